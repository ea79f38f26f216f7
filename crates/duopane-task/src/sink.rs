use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::trace;

/// Producer half of a task's bounded progress queue.
#[derive(Debug)]
pub struct ProgressSink<P> {
    tx: mpsc::Sender<P>,
}

impl<P> Clone for ProgressSink<P> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<P: Send + 'static> ProgressSink<P> {
    /// Create a sink and the receiver that drains it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<P>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue an intermediate update without waiting. Dropped when the queue is full.
    pub fn emit(&self, update: P) {
        match self.tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!("progress queue full, update dropped"),
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Queue an update that must be observed (first and last of an operation).
    pub async fn deliver(&self, update: P) {
        let _ = self.tx.send(update).await;
    }
}
