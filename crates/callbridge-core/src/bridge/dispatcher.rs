//! Dispatch loop, writer task and callable execution

use super::{Bridge, BridgeInner};
use crate::envelope::{CorrelationId, Envelope};
use crate::error::{BridgeError, ErrorInfo, kinds};
use crate::registry::{Affinity, CallContext, RegistryEntry};
use crate::transport::{FrameSink, FrameSource};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, warn};

/// An accepted call waiting to run
struct Job {
    id: CorrelationId,
    name: String,
    args: Vec<Value>,
    entry: RegistryEntry,
}

/// Background task that owns the sending half of the channel
pub(super) async fn writer_loop(
    inner: Arc<BridgeInner>,
    mut sink: Box<dyn FrameSink>,
    mut receiver: mpsc::UnboundedReceiver<Envelope>,
) {
    let max_frame = inner.config.max_frame_bytes;

    loop {
        let envelope = tokio::select! {
            biased;
            _ = inner.closed.cancelled() => break,
            envelope = receiver.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let frame = match envelope.encode() {
            Ok(frame) if frame.len() <= max_frame => frame,
            Ok(frame) => {
                warn!(
                    "Envelope {} is {} bytes, over the {} byte frame limit",
                    envelope.id(),
                    frame.len(),
                    max_frame
                );
                reject_oversized(&inner, envelope, frame.len(), max_frame);
                continue;
            }
            Err(e) => {
                error!("Failed to encode envelope {}: {}", envelope.id(), e);
                continue;
            }
        };

        if let Err(e) = sink.send(frame).await {
            error!("Bridge transport failed while sending: {}", e);
            inner.shutdown(&e.to_string());
            break;
        }
    }

    if let Err(e) = sink.close().await {
        debug!("Error closing bridge transport: {}", e);
    }
}

/// An envelope that cannot be framed never leaves the process. A call fails
/// locally; a response is replaced by an error the peer can still receive.
fn reject_oversized(inner: &BridgeInner, envelope: Envelope, size: usize, max: usize) {
    let message = format!("envelope of {} bytes exceeds frame limit of {}", size, max);
    match envelope {
        Envelope::Call { id, .. } => {
            let op = inner.pending.lock().remove(&id);
            if let Some(op) = op {
                op.resolve(id, Err(BridgeError::framing(message)));
            }
        }
        Envelope::Return { id, .. } => {
            inner.send(Envelope::error(id, ErrorInfo::failure(message)));
        }
        Envelope::Error { id, .. } => {
            inner.send(Envelope::error(
                id,
                ErrorInfo::failure("error payload exceeded the frame limit"),
            ));
        }
    }
}

/// Background task that reads the channel and routes every envelope
pub(super) async fn dispatch_loop(bridge: Bridge, mut source: Box<dyn FrameSource>) {
    let closed = bridge.inner.closed.clone();
    let (pool, pool_jobs) = mpsc::unbounded_channel();
    let (serial, serial_jobs) = mpsc::unbounded_channel();
    tokio::spawn(pool_feeder(bridge.clone(), pool_jobs));
    tokio::spawn(serial_worker(bridge.clone(), serial_jobs));

    let reason = loop {
        let frame = tokio::select! {
            biased;
            _ = closed.cancelled() => break "bridge closed locally".to_string(),
            frame = source.receive() => frame,
        };

        match frame {
            Ok(Some(bytes)) => match Envelope::decode(&bytes) {
                Ok(envelope) => route(&bridge, envelope, &pool, &serial),
                Err(e) => warn!("Dropping undecodable frame ({} bytes): {}", bytes.len(), e),
            },
            Ok(None) => {
                debug!("Bridge peer closed the channel");
                break "channel closed by peer".to_string();
            }
            Err(e) => {
                error!("Bridge transport failed while receiving: {}", e);
                break e.to_string();
            }
        }
    };

    bridge.inner.shutdown(&reason);
}

fn route(
    bridge: &Bridge,
    envelope: Envelope,
    pool: &mpsc::UnboundedSender<Job>,
    serial: &mpsc::UnboundedSender<Job>,
) {
    match envelope {
        Envelope::Call { id, name, args } => {
            debug!("Received call {} '{}' with {} arg(s)", id, name, args.len());

            if let Some(contract) = bridge.inner.contract() {
                if let Err(info) = contract.check_call(&name, &args) {
                    warn!("Rejecting call {} '{}': {}", id, name, info);
                    bridge.inner.send(Envelope::error(id, info));
                    return;
                }
            }

            let Some(entry) = bridge.inner.registry.lookup(&name) else {
                warn!("Call {} to unexposed function '{}'", id, name);
                bridge
                    .inner
                    .send(Envelope::error(id, ErrorInfo::not_exposed(&name)));
                return;
            };

            let queue = match entry.affinity {
                Affinity::Concurrent => pool,
                Affinity::Serial => serial,
            };
            if queue
                .send(Job {
                    id,
                    name,
                    args,
                    entry,
                })
                .is_err()
            {
                debug!("Worker queue closed, dropping call {}", id);
            }
        }
        Envelope::Return { id, result } => complete(bridge, id, Ok(result)),
        Envelope::Error { id, error } => complete(bridge, id, Err(error)),
    }
}

fn complete(bridge: &Bridge, id: CorrelationId, outcome: Result<Value, ErrorInfo>) {
    let op = bridge.inner.pending.lock().remove(&id);
    match op {
        Some(op) => {
            let outcome = outcome.map_err(|info| info.into_bridge_error(&op.name));
            op.resolve(id, outcome);
        }
        None => warn!(
            "Dropping {} for {}: no pending call (cancelled, timed out or duplicate)",
            if outcome.is_ok() { "return" } else { "error" },
            id
        ),
    }
}

/// Hands jobs to the worker pool in arrival order.
///
/// Permits are taken here rather than in the dispatch loop so a full pool
/// never stops responses from being read.
async fn pool_feeder(bridge: Bridge, mut jobs: mpsc::UnboundedReceiver<Job>) {
    let permits = Arc::new(Semaphore::new(bridge.inner.config.max_concurrent_calls));

    while let Some(job) = jobs.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let bridge = bridge.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let response = execute(&bridge, job).await;
            bridge.inner.send(response);
        });
    }
}

/// Runs serial jobs one at a time on a single task
async fn serial_worker(bridge: Bridge, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        let response = execute(&bridge, job).await;
        bridge.inner.send(response);
    }
}

/// Run one callable and turn its outcome into a response envelope
async fn execute(bridge: &Bridge, job: Job) -> Envelope {
    let Job {
        id,
        name,
        args,
        entry,
    } = job;
    let ctx = CallContext::new(id, name.clone(), bridge.clone());

    let outcome = AssertUnwindSafe(entry.function.call(ctx, args))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(result)) => {
            let checked = match bridge.inner.contract() {
                Some(contract) => match contract.get(&name) {
                    Some(signature) => signature.check_result(&result),
                    None => Ok(()),
                },
                None => Ok(()),
            };
            match checked {
                Ok(()) => Envelope::ret(id, result),
                Err(info) => {
                    warn!("'{}' returned a value outside its contract: {}", name, info);
                    Envelope::error(id, info)
                }
            }
        }
        Ok(Err(info)) => {
            warn!("Exposed function '{}' failed for {}: {}", name, id, info);
            Envelope::error(id, info)
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "callable panicked".to_string());
            error!("Exposed function '{}' panicked for {}: {}", name, id, message);
            Envelope::error(id, ErrorInfo::new(kinds::CALLABLE_PANICKED, message))
        }
    }
}
