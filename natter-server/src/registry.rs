//! Online-user registry
//!
//! The one piece of shared mutable state in the server: a map from display
//! identity to the session behind it, guarded by a single mutex. Every
//! operation is one short lock acquisition and never spans socket I/O, so a
//! stalled client cannot hold up anyone else's lookup. Rename moves a session
//! between two keys inside the same critical section; there is no window in
//! which both or neither name resolves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use natter_utils::{NatterError, Result};

/// The registry-visible half of a session
///
/// Shared by `Arc` with the registry, the fan-out worker and any session
/// performing a direct delivery. The socket itself stays with the session's
/// own tasks; everyone else only sees the mailbox sender.
pub struct SessionHandle {
    /// Current display identity; mutated only inside `Registry::rename`
    identity: Mutex<String>,
    /// Peer address, fixed for the life of the connection
    addr: String,
    /// Producer side of the session's outbound mailbox
    mailbox: mpsc::Sender<String>,
    /// One-shot close guard; flips to true on the first teardown trigger
    closing: AtomicBool,
}

impl SessionHandle {
    /// Create a handle for a freshly accepted connection
    ///
    /// The initial identity is the peer address.
    pub fn new(addr: String, mailbox: mpsc::Sender<String>) -> Self {
        Self {
            identity: Mutex::new(addr.clone()),
            addr,
            mailbox,
            closing: AtomicBool::new(false),
        }
    }

    /// Current display identity
    pub fn identity(&self) -> String {
        self.identity.lock().clone()
    }

    /// Peer address string
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Queue a line on this session's mailbox without blocking
    ///
    /// Returns `true` if the line was queued. A full mailbox drops the line
    /// with a warning (the peer is too slow to drain its socket); a closed
    /// mailbox means the session is shutting down and the line is skipped.
    pub fn try_deliver(&self, line: impl Into<String>) -> bool {
        match self.mailbox.try_send(line.into()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(peer = %self.addr, "mailbox full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(peer = %self.addr, "mailbox closed, message skipped");
                false
            }
        }
    }

    /// Claim the right to run teardown
    ///
    /// Returns `true` exactly once; later callers see `false` and must not
    /// touch the registry or announce anything.
    pub fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::SeqCst)
    }

    /// Whether teardown has started
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("identity", &*self.identity.lock())
            .field("addr", &self.addr)
            .field("closing", &self.is_closing())
            .field("mailbox_closed", &self.mailbox.is_closed())
            .finish()
    }
}

/// Registry of all online sessions, keyed by display identity
pub struct Registry {
    entries: Mutex<HashMap<String, Arc<SessionHandle>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a session under its current identity
    ///
    /// Fails with `IdentityTaken` if the identity is already present.
    pub fn insert(&self, handle: Arc<SessionHandle>) -> Result<()> {
        let identity = handle.identity();
        let mut entries = self.entries.lock();
        if entries.contains_key(&identity) {
            return Err(NatterError::IdentityTaken(identity));
        }
        debug!(identity = %identity, "session registered");
        entries.insert(identity, handle);
        Ok(())
    }

    /// Remove a session by identity
    ///
    /// Idempotent; returns the removed handle if one was present.
    pub fn remove(&self, identity: &str) -> Option<Arc<SessionHandle>> {
        let removed = self.entries.lock().remove(identity);
        if removed.is_some() {
            debug!(identity = %identity, "session removed");
        }
        removed
    }

    /// Look up a session by identity
    pub fn lookup(&self, identity: &str) -> Option<Arc<SessionHandle>> {
        self.entries.lock().get(identity).cloned()
    }

    /// Move a session from one identity to another, atomically
    ///
    /// Fails with `IdentityTaken` if `new` is already registered, which
    /// includes renaming to the name currently held (`new == old`). Fails
    /// with `TargetNotFound` if `old` is no longer registered, which only
    /// happens when the session is mid-teardown.
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(new) {
            return Err(NatterError::IdentityTaken(new.to_string()));
        }
        let Some(handle) = entries.remove(old) else {
            return Err(NatterError::TargetNotFound(old.to_string()));
        };
        *handle.identity.lock() = new.to_string();
        entries.insert(new.to_string(), handle);
        debug!(old = %old, new = %new, "session renamed");
        Ok(())
    }

    /// Consistent view of every registered session
    pub fn snapshot(&self) -> Vec<Arc<SessionHandle>> {
        self.entries.lock().values().cloned().collect()
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("online", &self.len())
            .finish()
    }
}
