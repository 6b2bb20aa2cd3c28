use tokio::sync::mpsc;

use crate::agent_engine::state::StreamEvent;

pub const EVENT_BUFFER: usize = 32;

/// Ordered, single-consumer event channel for one request.
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        (Self::new(tx), rx)
    }

    /// Returns `false` once the consumer has gone away.
    pub async fn emit(&self, event: StreamEvent) -> bool {
        tracing::trace!(?event, "emit");
        if self.tx.send(event).await.is_err() {
            tracing::debug!("event consumer dropped");
            return false;
        }
        true
    }
}
