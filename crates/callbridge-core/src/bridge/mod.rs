//! Bridge facade
//!
//! One `Bridge` per process, explicitly wired to one channel:
//!
//! ```rust,ignore
//! use callbridge_core::{Bridge, BridgeConfig, sync_fn, transport::StreamTransport};
//!
//! let bridge = Bridge::new(BridgeConfig::default());
//! bridge.expose("ping", sync_fn(|_| Ok(json!("pong"))));
//! bridge.connect(StreamTransport::connect("127.0.0.1:8000", 1 << 20).await?)?;
//!
//! let reply = bridge.invoke("DisplayMessage", ["Listening..."]).await?;
//! ```
//!
//! # Features
//! - Concurrent calls correlated by id, resolved exactly once
//! - Calls within calls (callables may `invoke` back before returning)
//! - Cancellation and timeouts that leave the remote side untouched
//! - Connection-lost cascade to every pending call when the channel dies

mod dispatcher;
mod pending;

pub use pending::PendingCall;

use crate::config::BridgeConfig;
use crate::contract::Contract;
use crate::envelope::{CorrelationId, Envelope, to_args};
use crate::error::{BridgeError, BridgeResult};
use crate::registry::{Affinity, ExposedFunction, FunctionRegistry};
use crate::transport::Channel;
use parking_lot::{Mutex, RwLock};
use pending::PendingOperation;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// State shared by the facade, the dispatch loop and the writer task
pub(crate) struct BridgeInner {
    config: BridgeConfig,
    registry: FunctionRegistry,
    contract: RwLock<Option<Arc<Contract>>>,
    /// Pending operations by correlation id
    pub(crate) pending: Mutex<HashMap<CorrelationId, PendingOperation>>,
    next_id: AtomicU64,
    /// Queue to the writer task; `None` before `connect` and after closure.
    /// Lock order: `outgoing` before `pending`.
    outgoing: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    connected_once: Mutex<bool>,
    closed: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BridgeInner {
    /// Queue an envelope for the writer task. Returns false once the channel is gone.
    pub(crate) fn send(&self, envelope: Envelope) -> bool {
        let outgoing = self.outgoing.lock();
        match outgoing.as_ref() {
            Some(sender) => sender.send(envelope).is_ok(),
            None => {
                debug!("Channel closed, dropping outgoing {:?} {}", envelope.direction(), envelope.id());
                false
            }
        }
    }

    /// Tear the channel down: disable sends and fail every pending operation
    pub(crate) fn shutdown(&self, reason: &str) {
        let was_open = self.outgoing.lock().take().is_some();
        self.closed.cancel();

        let drained: Vec<(CorrelationId, PendingOperation)> =
            self.pending.lock().drain().collect();
        if was_open {
            debug!(
                "Bridge channel closed ({}), failing {} pending call(s)",
                reason,
                drained.len()
            );
        }
        for (id, op) in drained {
            op.resolve(id, Err(BridgeError::connection_lost(reason)));
        }
    }

    fn contract(&self) -> Option<Arc<Contract>> {
        self.contract.read().clone()
    }
}

/// Bidirectional function-exposure bridge. Cheap to clone.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    /// Create an unconnected bridge
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                config,
                registry: FunctionRegistry::new(),
                contract: RwLock::new(None),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                outgoing: Mutex::new(None),
                connected_once: Mutex::new(false),
                closed: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Bridge configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Expose `function` as `name` on the worker pool (last registration wins)
    pub fn expose(&self, name: impl Into<String>, function: Arc<dyn ExposedFunction>) {
        self.inner
            .registry
            .expose(name, function, Affinity::Concurrent);
    }

    /// Expose `function` as `name` on the serial queue: calls to serial
    /// functions never overlap and run in arrival order.
    ///
    /// The queue holds one call at a time. A serial function may call the
    /// remote side, and the remote may call back into concurrent functions
    /// here, but a callback into any serial function on this side waits
    /// behind its caller forever.
    pub fn expose_serial(&self, name: impl Into<String>, function: Arc<dyn ExposedFunction>) {
        self.inner.registry.expose(name, function, Affinity::Serial);
    }

    /// Remove an exposed function. Returns whether it was exposed.
    pub fn unexpose(&self, name: &str) -> bool {
        self.inner.registry.unexpose(name)
    }

    /// Exposed names, sorted
    pub fn exposed_names(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    /// Validate incoming calls against `contract` (`None` disables validation)
    pub fn set_contract(&self, contract: Option<Contract>) {
        *self.inner.contract.write() = contract.map(Arc::new);
    }

    /// Attach the channel and start dispatching. Must run inside a tokio runtime.
    #[instrument(skip(self, channel), fields(channel = %channel.label()))]
    pub fn connect(&self, channel: Channel) -> BridgeResult<()> {
        {
            let mut connected_once = self.inner.connected_once.lock();
            if *connected_once {
                return Err(BridgeError::AlreadyConnected);
            }
            *connected_once = true;
        }

        let (label, sink, source) = channel.into_parts();
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.inner.outgoing.lock() = Some(sender);

        let writer = tokio::spawn(dispatcher::writer_loop(
            Arc::clone(&self.inner),
            sink,
            receiver,
        ));
        let reader = tokio::spawn(dispatcher::dispatch_loop(self.clone(), source));
        self.inner.tasks.lock().extend([writer, reader]);

        debug!(
            "Bridge connected over {} with {} exposed function(s)",
            label,
            self.inner.registry.len()
        );
        Ok(())
    }

    /// Whether the channel is up
    pub fn is_connected(&self) -> bool {
        self.inner.outgoing.lock().is_some()
    }

    /// Number of calls waiting for a response
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Resolves once the channel is closed, from either side
    pub async fn closed(&self) {
        let token = self.inner.closed.clone();
        token.cancelled().await;
    }

    /// Close the channel, fail pending calls and wait for the bridge tasks to stop
    pub async fn close(&self) {
        self.inner.shutdown("bridge closed locally");
        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Send a call and return a handle to its eventual result.
    ///
    /// Fails without sending anything if an argument is not serializable or
    /// the channel is closed.
    pub fn request<I, T>(&self, name: &str, args: I) -> BridgeResult<PendingCall>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        let args = to_args(args)?;
        let id = CorrelationId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let (op, receiver) = PendingOperation::new(name);

        {
            let outgoing = self.inner.outgoing.lock();
            let sender = outgoing.as_ref().ok_or(BridgeError::ChannelClosed)?;
            // Register before sending so the response can never overtake its registration
            self.inner.pending.lock().insert(id, op);
            if sender.send(Envelope::call(id, name, args)).is_err() {
                self.inner.pending.lock().remove(&id);
                return Err(BridgeError::ChannelClosed);
            }
        }

        debug!("Sent call {} '{}'", id, name);
        Ok(PendingCall::new(
            id,
            name,
            receiver,
            Arc::downgrade(&self.inner),
        ))
    }

    /// Call `name` on the remote side and wait for the result, bounded by the
    /// configured default timeout if there is one
    #[instrument(skip(self, args), fields(function = %name))]
    pub async fn invoke<I, T>(&self, name: &str, args: I) -> BridgeResult<Value>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        let call = self.request(name, args)?;
        match self.inner.config.request_timeout() {
            Some(timeout) => with_deadline(call, timeout).await,
            None => call.await,
        }
    }

    /// Call `name` and wait at most `timeout` for the result
    pub async fn invoke_with_timeout<I, T>(
        &self,
        name: &str,
        args: I,
        timeout: Duration,
    ) -> BridgeResult<Value>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        let call = self.request(name, args)?;
        with_deadline(call, timeout).await
    }

    /// Call `name` and deserialize the result
    pub async fn invoke_as<R, I, T>(&self, name: &str, args: I) -> BridgeResult<R>
    where
        R: DeserializeOwned,
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        let value = self.invoke(name, args).await?;
        serde_json::from_value(value).map_err(|e| {
            BridgeError::malformed(format!("unexpected result from '{}': {}", name, e))
        })
    }

    /// Call `name` without waiting. Failures are logged, not returned,
    /// except those detected before sending.
    pub fn post<I, T>(&self, name: &str, args: I) -> BridgeResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        let call = self.request(name, args)?;
        let timeout = self.inner.config.request_timeout();
        tokio::spawn(async move {
            let name = call.name().to_string();
            let outcome = match timeout {
                Some(timeout) => with_deadline(call, timeout).await,
                None => call.await,
            };
            if let Err(e) = outcome {
                warn!("Posted call to '{}' failed: {}", name, e);
            }
        });
        Ok(())
    }
}

async fn with_deadline(call: PendingCall, timeout: Duration) -> BridgeResult<Value> {
    match tokio::time::timeout(timeout, call).await {
        Ok(outcome) => outcome,
        // The call was dropped with the timeout future, which removed it from the table
        Err(_) => Err(BridgeError::Timeout {
            millis: timeout_millis(timeout),
        }),
    }
}

fn timeout_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("connected", &self.is_connected())
            .field("pending", &self.pending_count())
            .field("exposed", &self.inner.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_millis_saturates() {
        assert_eq!(timeout_millis(Duration::from_millis(10)), 10);
        assert_eq!(timeout_millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_with_deadline_reports_timeout() {
        let (_operation, receiver) = PendingOperation::new("hang");
        let call = PendingCall::new(CorrelationId(1), "hang", receiver, std::sync::Weak::new());
        let err = with_deadline(call, Duration::from_millis(5)).await.unwrap_err();
        assert_eq!(err, BridgeError::Timeout { millis: 5 });
    }
}
