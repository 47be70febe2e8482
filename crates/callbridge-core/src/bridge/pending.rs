//! Pending operations on the calling side

use super::BridgeInner;
use crate::envelope::CorrelationId;
use crate::error::{BridgeError, BridgeResult};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::debug;

/// A call that was sent and is waiting for its response
pub(crate) struct PendingOperation {
    pub(crate) name: String,
    pub(crate) created_at: Instant,
    slot: oneshot::Sender<BridgeResult<Value>>,
}

impl PendingOperation {
    pub(crate) fn new(name: impl Into<String>) -> (Self, oneshot::Receiver<BridgeResult<Value>>) {
        let (slot, receiver) = oneshot::channel();
        (
            Self {
                name: name.into(),
                created_at: Instant::now(),
                slot,
            },
            receiver,
        )
    }

    /// Complete the operation. Consumes it, so it resolves at most once.
    pub(crate) fn resolve(self, id: CorrelationId, outcome: BridgeResult<Value>) {
        debug!(
            "Resolved {} '{}' after {:?} ({})",
            id,
            self.name,
            self.created_at.elapsed(),
            if outcome.is_ok() { "ok" } else { "failed" }
        );
        // The caller may have stopped listening between removal and send
        let _ = self.slot.send(outcome);
    }
}

/// Handle to an in-flight call.
///
/// Awaiting it yields the remote result. Dropping it, or calling
/// [`PendingCall::cancel`], abandons the call: the remote side still runs it,
/// but its response will be discarded.
pub struct PendingCall {
    id: CorrelationId,
    name: String,
    receiver: oneshot::Receiver<BridgeResult<Value>>,
    inner: Weak<BridgeInner>,
    finished: bool,
}

impl PendingCall {
    pub(crate) fn new(
        id: CorrelationId,
        name: impl Into<String>,
        receiver: oneshot::Receiver<BridgeResult<Value>>,
        inner: Weak<BridgeInner>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            receiver,
            inner,
            finished: false,
        }
    }

    /// Correlation id of the call
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Remote function name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop waiting for the result
    pub fn cancel(mut self) {
        self.abandon();
    }

    fn abandon(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(inner) = self.inner.upgrade() {
            if inner.pending.lock().remove(&self.id).is_some() {
                debug!("Abandoned {} '{}'", self.id, self.name);
            }
        }
    }
}

impl Future for PendingCall {
    type Output = BridgeResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.finished {
            return Poll::Ready(Err(BridgeError::Cancelled));
        }
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(outcome) => {
                self.finished = true;
                Poll::Ready(outcome.unwrap_or_else(|_| {
                    Err(BridgeError::connection_lost("bridge dropped the pending call"))
                }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.abandon();
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("finished", &self.finished)
            .finish()
    }
}
