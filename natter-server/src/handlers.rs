//! Inbound command execution
//!
//! One `HandlerContext` per session. It parses each line off the wire and
//! runs it against the registry and the broadcaster. Replies go through the
//! requesting session's own mailbox; only public messages touch the shared
//! fan-out queue. Per-command failures become reply lines and never end the
//! session.

use std::sync::Arc;

use tracing::debug;

use natter_protocol::{messages, Command, Envelope};
use natter_utils::{NatterError, Result};

use crate::broadcaster::Broadcaster;
use crate::registry::{Registry, SessionHandle};

/// Executes parsed commands on behalf of one session
pub struct HandlerContext {
    registry: Arc<Registry>,
    broadcaster: Broadcaster,
    handle: Arc<SessionHandle>,
}

impl HandlerContext {
    pub fn new(
        registry: Arc<Registry>,
        broadcaster: Broadcaster,
        handle: Arc<SessionHandle>,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            handle,
        }
    }

    /// Parse and execute one line from this session's peer
    ///
    /// Only a broadcast can fail, and only when the fan-out queue is gone;
    /// everything else resolves to a reply line at worst.
    pub async fn route_line(&self, line: &str) -> Result<()> {
        match Command::parse(line) {
            Ok(Command::Who) => self.handle_who(),
            Ok(Command::Rename { name }) => self.handle_rename(&name),
            Ok(Command::Direct { target, body }) => self.handle_direct(&target, &body),
            Ok(Command::Broadcast { body }) => self.handle_broadcast(&body).await?,
            Err(e) => {
                debug!(peer = %self.handle.addr(), error = %e, "malformed direct message");
                self.reply(messages::direct_usage());
            }
        }
        Ok(())
    }

    /// `who`: one roster line per online session, to the requester only
    fn handle_who(&self) {
        for entry in self.registry.snapshot() {
            self.reply(messages::who_entry(entry.addr(), &entry.identity()));
        }
    }

    /// `rename|<name>`: atomic move in the registry, then confirm or reject
    fn handle_rename(&self, name: &str) {
        let current = self.handle.identity();
        match self.registry.rename(&current, name) {
            Ok(()) => self.reply(messages::name_updated(name)),
            Err(NatterError::IdentityTaken(_)) => self.reply(messages::name_taken(name)),
            // Old identity already gone: the session is mid-teardown and
            // the reply would never be flushed anyway
            Err(e) => debug!(peer = %self.handle.addr(), error = %e, "rename skipped"),
        }
    }

    /// `to|<target>|<body>`: deliver into the target's mailbox only
    ///
    /// The reply order is peer-visible: an unknown target is reported before
    /// an empty body is. Messaging one's own identity is allowed.
    fn handle_direct(&self, target: &str, body: &str) {
        let Some(recipient) = self.registry.lookup(target) else {
            self.reply(messages::target_missing(target));
            return;
        };
        if body.is_empty() {
            self.reply(messages::empty_body());
            return;
        }
        recipient.try_deliver(messages::direct_line(
            self.handle.addr(),
            &self.handle.identity(),
            body,
        ));
    }

    /// Anything else: render and hand to the fan-out worker
    async fn handle_broadcast(&self, body: &str) -> Result<()> {
        self.broadcaster
            .publish(Envelope::render(
                self.handle.addr(),
                &self.handle.identity(),
                body,
            ))
            .await
    }

    /// Queue a line on the requesting session's own mailbox
    fn reply(&self, line: String) {
        self.handle.try_deliver(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn make_handle(addr: &str) -> (Arc<SessionHandle>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        (Arc::new(SessionHandle::new(addr.to_string(), tx)), rx)
    }

    /// Two registered sessions plus a context acting for the first
    fn setup_room() -> (
        HandlerContext,
        mpsc::Receiver<String>,
        mpsc::Receiver<String>,
        Arc<Registry>,
        Broadcaster,
    ) {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::spawn(Arc::clone(&registry), 8);

        let (alice, rx_alice) = make_handle("1.1.1.1:100");
        let (bob, rx_bob) = make_handle("2.2.2.2:200");
        registry.insert(Arc::clone(&alice)).unwrap();
        registry.insert(bob).unwrap();

        let ctx = HandlerContext::new(Arc::clone(&registry), broadcaster.clone(), alice);
        (ctx, rx_alice, rx_bob, registry, broadcaster)
    }

    async fn recv_line(rx: &mut mpsc::Receiver<String>) -> String {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for line")
            .expect("mailbox closed")
    }

    // ==================== Who Tests ====================

    #[tokio::test]
    async fn test_who_lists_roster_to_requester_only() {
        let (ctx, mut rx_alice, mut rx_bob, _registry, _broadcaster) = setup_room();

        ctx.route_line("who").await.unwrap();

        // Replies are queued synchronously; order follows the snapshot
        let mut lines = std::collections::HashSet::new();
        lines.insert(rx_alice.try_recv().unwrap());
        lines.insert(rx_alice.try_recv().unwrap());
        assert!(lines.contains("[1.1.1.1:100]1.1.1.1:100: Online ... "));
        assert!(lines.contains("[2.2.2.2:200]2.2.2.2:200: Online ... "));

        assert!(rx_alice.try_recv().is_err(), "exactly one line per session");
        assert!(rx_bob.try_recv().is_err(), "who must not broadcast");
    }

    // ==================== Rename Tests ====================

    #[tokio::test]
    async fn test_rename_confirms_and_moves_registry_entry() {
        let (ctx, mut rx_alice, _rx_bob, registry, _broadcaster) = setup_room();

        ctx.route_line("rename|alice").await.unwrap();

        assert_eq!(
            rx_alice.try_recv().unwrap(),
            "name has been updated: alice "
        );
        assert!(registry.lookup("alice").is_some());
        assert!(registry.lookup("1.1.1.1:100").is_none());
    }

    #[tokio::test]
    async fn test_rename_collision_replies_taken() {
        let (ctx, mut rx_alice, _rx_bob, registry, _broadcaster) = setup_room();

        ctx.route_line("rename|2.2.2.2:200").await.unwrap();

        assert_eq!(rx_alice.try_recv().unwrap(), "2.2.2.2:200 has been taken ");
        // The requester keeps its old identity
        assert!(registry.lookup("1.1.1.1:100").is_some());
    }

    #[tokio::test]
    async fn test_rename_to_own_name_replies_taken() {
        let (ctx, mut rx_alice, _rx_bob, _registry, _broadcaster) = setup_room();

        ctx.route_line("rename|1.1.1.1:100").await.unwrap();

        assert_eq!(rx_alice.try_recv().unwrap(), "1.1.1.1:100 has been taken ");
    }

    #[tokio::test]
    async fn test_rename_then_who_shows_new_name() {
        let (ctx, mut rx_alice, _rx_bob, _registry, _broadcaster) = setup_room();

        ctx.route_line("rename|fresh").await.unwrap();
        let _confirmation = rx_alice.try_recv().unwrap();

        ctx.route_line("who").await.unwrap();
        let mut lines = std::collections::HashSet::new();
        lines.insert(rx_alice.try_recv().unwrap());
        lines.insert(rx_alice.try_recv().unwrap());
        assert!(lines.contains("[1.1.1.1:100]fresh: Online ... "));
        assert!(
            !lines.iter().any(|l| l.contains("]1.1.1.1:100:")),
            "old identity must not appear"
        );
    }

    // ==================== Direct Message Tests ====================

    #[tokio::test]
    async fn test_direct_delivered_to_target_only() {
        let (ctx, mut rx_alice, mut rx_bob, _registry, _broadcaster) = setup_room();

        ctx.route_line("to|2.2.2.2:200|psst").await.unwrap();

        assert_eq!(
            rx_bob.try_recv().unwrap(),
            "from [1.1.1.1:100]1.1.1.1:100: psst"
        );
        assert!(rx_alice.try_recv().is_err(), "sender gets no copy");
    }

    #[tokio::test]
    async fn test_direct_to_self_is_permitted() {
        let (ctx, mut rx_alice, _rx_bob, _registry, _broadcaster) = setup_room();

        ctx.route_line("to|1.1.1.1:100|note to self").await.unwrap();

        assert_eq!(
            rx_alice.try_recv().unwrap(),
            "from [1.1.1.1:100]1.1.1.1:100: note to self"
        );
    }

    #[tokio::test]
    async fn test_direct_unknown_target_replies_sender_only() {
        let (ctx, mut rx_alice, mut rx_bob, _registry, _broadcaster) = setup_room();

        ctx.route_line("to|ghost|hello?").await.unwrap();

        assert_eq!(rx_alice.try_recv().unwrap(), "ghost is not exist ");
        assert!(rx_bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_direct_empty_body_rejected() {
        let (ctx, mut rx_alice, mut rx_bob, _registry, _broadcaster) = setup_room();

        ctx.route_line("to|2.2.2.2:200|").await.unwrap();

        assert_eq!(
            rx_alice.try_recv().unwrap(),
            "msg can't be empty, please try again"
        );
        assert!(rx_bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_direct_unknown_target_reported_before_empty_body() {
        let (ctx, mut rx_alice, _rx_bob, _registry, _broadcaster) = setup_room();

        ctx.route_line("to|ghost|").await.unwrap();

        assert_eq!(rx_alice.try_recv().unwrap(), "ghost is not exist ");
    }

    #[tokio::test]
    async fn test_direct_missing_fields_gets_usage_reply() {
        let (ctx, mut rx_alice, mut rx_bob, _registry, _broadcaster) = setup_room();

        ctx.route_line("to|2.2.2.2:200").await.unwrap();
        assert_eq!(
            rx_alice.try_recv().unwrap(),
            "message format wrong, please use format like \"to|name|msg\" "
        );

        ctx.route_line("to||hello").await.unwrap();
        assert_eq!(
            rx_alice.try_recv().unwrap(),
            "message format wrong, please use format like \"to|name|msg\" "
        );

        assert!(rx_bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_direct_body_keeps_interior_delimiters() {
        let (ctx, _rx_alice, mut rx_bob, _registry, _broadcaster) = setup_room();

        ctx.route_line("to|2.2.2.2:200|a|b|c").await.unwrap();

        assert_eq!(
            rx_bob.try_recv().unwrap(),
            "from [1.1.1.1:100]1.1.1.1:100: a|b|c"
        );
    }

    // ==================== Broadcast Tests ====================

    #[tokio::test]
    async fn test_broadcast_reaches_every_mailbox_once() {
        let (ctx, mut rx_alice, mut rx_bob, _registry, _broadcaster) = setup_room();

        ctx.route_line("hello room").await.unwrap();

        let expected = "[1.1.1.1:100]1.1.1.1:100: hello room";
        assert_eq!(recv_line(&mut rx_alice).await, expected);
        assert_eq!(recv_line(&mut rx_bob).await, expected);
        assert!(rx_alice.try_recv().is_err(), "no duplicate delivery");
        assert!(rx_bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_uses_current_identity() {
        let (ctx, mut rx_alice, mut rx_bob, _registry, _broadcaster) = setup_room();

        ctx.route_line("rename|alice").await.unwrap();
        let _confirmation = rx_alice.try_recv().unwrap();

        ctx.route_line("hello again").await.unwrap();

        assert_eq!(recv_line(&mut rx_bob).await, "[1.1.1.1:100]alice: hello again");
    }

    #[tokio::test]
    async fn test_empty_line_broadcasts_empty_body() {
        let (ctx, _rx_alice, mut rx_bob, _registry, _broadcaster) = setup_room();

        ctx.route_line("").await.unwrap();

        assert_eq!(recv_line(&mut rx_bob).await, "[1.1.1.1:100]1.1.1.1:100: ");
    }
}
