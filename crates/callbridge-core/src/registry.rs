//! Function registry
//!
//! Maps exposed names to local callables. Registration is last-wins and local
//! to this process. Lookups hand out an `Arc` snapshot of the entry, so a
//! concurrent re-`expose` never changes a callable that is already running.

use crate::bridge::Bridge;
use crate::envelope::CorrelationId;
use crate::error::ErrorInfo;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Context handed to a callable for one invocation
#[derive(Clone)]
pub struct CallContext {
    id: CorrelationId,
    name: String,
    bridge: Bridge,
}

impl CallContext {
    pub(crate) fn new(id: CorrelationId, name: impl Into<String>, bridge: Bridge) -> Self {
        Self {
            id,
            name: name.into(),
            bridge,
        }
    }

    /// Correlation id of the incoming call
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Name the call was addressed to
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bridge the call arrived on, for calling back into the remote side
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A function reachable by name from the remote side
#[async_trait]
pub trait ExposedFunction: Send + Sync {
    /// Run the function. `Err` is sent back to the caller as an `Error` envelope.
    async fn call(&self, ctx: CallContext, args: Vec<Value>) -> Result<Value, ErrorInfo>;
}

/// Adapter for plain synchronous closures
pub struct SyncFn<F>(F);

#[async_trait]
impl<F> ExposedFunction for SyncFn<F>
where
    F: Fn(Vec<Value>) -> Result<Value, ErrorInfo> + Send + Sync,
{
    async fn call(&self, _ctx: CallContext, args: Vec<Value>) -> Result<Value, ErrorInfo> {
        (self.0)(args)
    }
}

/// Adapter for async closures that receive the call context
pub struct AsyncFn<F>(F);

#[async_trait]
impl<F, Fut> ExposedFunction for AsyncFn<F>
where
    F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ErrorInfo>> + Send + 'static,
{
    async fn call(&self, ctx: CallContext, args: Vec<Value>) -> Result<Value, ErrorInfo> {
        (self.0)(ctx, args).await
    }
}

/// Wrap a synchronous closure
pub fn sync_fn<F>(f: F) -> Arc<dyn ExposedFunction>
where
    F: Fn(Vec<Value>) -> Result<Value, ErrorInfo> + Send + Sync + 'static,
{
    Arc::new(SyncFn(f))
}

/// Wrap an async closure
pub fn async_fn<F, Fut>(f: F) -> Arc<dyn ExposedFunction>
where
    F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ErrorInfo>> + Send + 'static,
{
    Arc::new(AsyncFn(f))
}

/// Where an exposed function runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Affinity {
    /// On the worker pool, possibly alongside other calls
    #[default]
    Concurrent,
    /// On the single serial queue, one call at a time in arrival order
    Serial,
}

/// Registry entry
#[derive(Clone)]
pub struct RegistryEntry {
    pub name: String,
    pub function: Arc<dyn ExposedFunction>,
    pub affinity: Affinity,
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("name", &self.name)
            .field("affinity", &self.affinity)
            .finish_non_exhaustive()
    }
}

/// Per-process function registry
#[derive(Default)]
pub struct FunctionRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `function` under `name`, replacing any earlier registration
    pub fn expose(
        &self,
        name: impl Into<String>,
        function: Arc<dyn ExposedFunction>,
        affinity: Affinity,
    ) {
        let name = name.into();
        let entry = RegistryEntry {
            name: name.clone(),
            function,
            affinity,
        };
        if self.entries.write().insert(name.clone(), entry).is_some() {
            debug!("Replaced exposed function '{}'", name);
        } else {
            debug!("Exposed function '{}' ({:?})", name, affinity);
        }
    }

    /// Snapshot of the entry registered under `name`
    pub fn lookup(&self, name: &str) -> Option<RegistryEntry> {
        self.entries.read().get(name).cloned()
    }

    /// Remove `name`. Returns whether it was registered.
    pub fn unexpose(&self, name: &str) -> bool {
        let removed = self.entries.write().remove(name).is_some();
        if removed {
            debug!("Unexposed function '{}'", name);
        }
        removed
    }

    /// Exposed names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of exposed functions
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is exposed
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
