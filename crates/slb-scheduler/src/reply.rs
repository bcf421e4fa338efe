//! Single-use reply channels.
//!
//! Every request carries a `ReplySender` back to the caller. The sender is
//! consumed by `send`, so at most one value is ever delivered, and sending
//! never blocks: if the caller already gave up, the value is dropped.
//! The receiver is consumed by `wait`, so it is read at most once.

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};

/// Producer half, held by whoever resolves the request.
#[derive(Debug)]
pub struct ReplySender<T> {
    tx: oneshot::Sender<T>,
}

/// Consumer half, held by the caller.
#[derive(Debug)]
pub struct ReplyReceiver<T> {
    rx: oneshot::Receiver<T>,
}

/// Create a connected sender/receiver pair.
pub fn reply_channel<T>() -> (ReplySender<T>, ReplyReceiver<T>) {
    let (tx, rx) = oneshot::channel();
    (ReplySender { tx }, ReplyReceiver { rx })
}

impl<T> ReplySender<T> {
    /// Deliver the reply. Returns false if the caller is no longer waiting.
    pub fn send(self, value: T) -> bool {
        match self.tx.send(value) {
            Ok(()) => true,
            Err(_) => {
                debug!("reply dropped, caller stopped waiting");
                false
            }
        }
    }

    /// True once the receiver has been dropped (for example after a timeout).
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> ReplyReceiver<T> {
    /// Wait for the reply for at most `deadline`.
    ///
    /// A sender dropped without replying (for instance by a panic in the
    /// component resolving the request) surfaces as `Internal`.
    pub async fn wait(self, deadline: Duration) -> SchedulerResult<T> {
        match tokio::time::timeout(deadline, self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(SchedulerError::Internal(
                "request dropped without a reply".to_string(),
            )),
            Err(_) => Err(SchedulerError::Timeout),
        }
    }
}
