//! Per-session idle watchdog
//!
//! Each session runs one timer task that waits for whichever comes first: an
//! activity signal, which restarts the deadline, or deadline expiry, which
//! queues the timeout notice on the session's own mailbox and tells the
//! reader loop to tear the session down. Dropping the handle stops the task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use natter_protocol::messages::TIMEOUT_NOTICE;

use crate::registry::SessionHandle;

/// Handle for signalling activity to a session's idle timer
pub struct IdleWatchdog {
    activity: mpsc::Sender<()>,
}

impl IdleWatchdog {
    /// Spawn the timer task for one session
    ///
    /// Returns the watchdog handle and the expiry signal the reader loop
    /// selects on. The signal resolves `Ok` when the deadline passes and
    /// `Err` if the task stops first (handle dropped during teardown).
    pub fn spawn(handle: Arc<SessionHandle>, deadline: Duration) -> (Self, oneshot::Receiver<()>) {
        let (activity_tx, activity_rx) = mpsc::channel(1);
        let (expired_tx, expired_rx) = oneshot::channel();
        tokio::spawn(idle_timer_task(handle, deadline, activity_rx, expired_tx));
        (Self { activity: activity_tx }, expired_rx)
    }

    /// Record activity, restarting the deadline
    ///
    /// Non-blocking: if a signal is already queued the pending reset covers
    /// this one too.
    pub fn touch(&self) {
        let _ = self.activity.try_send(());
    }
}

/// Waits out the deadline, restarting it on every activity signal
async fn idle_timer_task(
    handle: Arc<SessionHandle>,
    deadline: Duration,
    mut activity: mpsc::Receiver<()>,
    expired: oneshot::Sender<()>,
) {
    loop {
        tokio::select! {
            signal = activity.recv() => {
                match signal {
                    // Loop around; the select rebuilds the sleep, so the
                    // full deadline starts over
                    Some(()) => {}
                    None => {
                        debug!(peer = %handle.addr(), "watchdog stopped, session closing");
                        return;
                    }
                }
            }
            _ = tokio::time::sleep(deadline) => {
                info!(
                    peer = %handle.addr(),
                    idle_secs = deadline.as_secs(),
                    "idle deadline reached, closing session"
                );
                // Best effort: the notice only reaches the peer if the
                // mailbox still has room before teardown closes it
                handle.try_deliver(TIMEOUT_NOTICE);
                let _ = expired.send(());
                return;
            }
        }
    }
}
