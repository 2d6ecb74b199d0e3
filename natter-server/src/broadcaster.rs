//! Broadcast fan-out
//!
//! One bounded queue of rendered envelopes feeds a single worker task, so
//! every observer sees broadcasts in the same order and publishing sessions
//! never take the registry lock themselves. The worker snapshots the registry
//! per envelope and pushes the line into each mailbox without blocking: a
//! full mailbox drops that recipient's copy, a closed one is skipped, and one
//! slow client never stalls delivery to the rest. Publishing blocks when the
//! queue itself is full, which throttles a flooding sender at its own reader
//! loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use natter_protocol::Envelope;
use natter_utils::{NatterError, Result};

use crate::registry::Registry;

/// Publishing handle for the shared fan-out queue
///
/// Cheap to clone; all clones feed the same worker.
#[derive(Clone)]
pub struct Broadcaster {
    queue: mpsc::Sender<Envelope>,
}

impl Broadcaster {
    /// Spawn the fan-out worker and return the publishing handle
    ///
    /// The worker runs until every clone of the handle has been dropped.
    pub fn spawn(registry: Arc<Registry>, queue_capacity: usize) -> Self {
        let (queue, rx) = mpsc::channel(queue_capacity);
        tokio::spawn(fan_out_worker(registry, rx));
        Self { queue }
    }

    /// Queue an envelope for delivery to every registered session
    ///
    /// Waits for queue room when the worker is behind.
    pub async fn publish(&self, envelope: Envelope) -> Result<()> {
        self.queue
            .send(envelope)
            .await
            .map_err(|_| NatterError::internal("broadcast queue is closed"))
    }
}

/// Drains the queue; each envelope is fully fanned out before the next starts
async fn fan_out_worker(registry: Arc<Registry>, mut queue: mpsc::Receiver<Envelope>) {
    while let Some(envelope) = queue.recv().await {
        let targets = registry.snapshot();
        let line = envelope.into_line();

        let mut delivered = 0;
        for handle in &targets {
            if handle.try_deliver(line.clone()) {
                delivered += 1;
            }
        }
        debug!(recipients = targets.len(), delivered, "broadcast fanned out");
    }
    debug!("broadcast queue closed, fan-out worker exiting");
}
