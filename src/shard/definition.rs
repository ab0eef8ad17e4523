//! Shard interface and definitions
//!
//! A shard is built by its factory once every dependency is Ready. The
//! factory receives a [`ShardContext`] holding typed handles to those
//! dependencies, the setter for its observable fields and its event
//! publisher. Nothing else about the container is visible to shard code.

use crate::error::{CallError, HostError, ShardFailure};
use crate::events::{EventBus, EventPublisher};
use crate::protocol::envelope::FieldMap;
use crate::rpc::CallRouter;
use crate::sync::{ObservableState, StateSyncBridge};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// An independently defined service unit
///
/// Every method has a default so a shard only implements what it uses.
///
/// ## Example
///
/// ```ignore
/// struct Clock { state: ObservableState }
///
/// #[async_trait]
/// impl Shard for Clock {
///     fn operations(&self) -> &[&'static str] {
///         &["now"]
///     }
///
///     async fn call(&self, operation: &str, _args: Vec<Value>) -> Result<Value, ShardFailure> {
///         match operation {
///             "now" => Ok(json!(unix_millis())),
///             other => Err(ShardFailure::new(format!("unhandled operation '{other}'"))),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Shard: Send + Sync + 'static {
    /// Names of the remotely callable operations
    fn operations(&self) -> &[&'static str] {
        &[]
    }

    /// Handle one operation. Only names from [`Shard::operations`] are routed here.
    async fn call(&self, operation: &str, args: Vec<Value>) -> Result<Value, ShardFailure> {
        let _ = args;
        Err(ShardFailure::new(format!("unhandled operation '{operation}'")))
    }

    /// Called once after construction, before the shard becomes Ready
    async fn init(&self) -> Result<(), ShardFailure> {
        Ok(())
    }

    /// Called once during teardown, dependents first
    async fn dispose(&self) -> Result<(), ShardFailure> {
        Ok(())
    }
}

/// Constructs a shard instance from its resolved dependencies
pub type ShardFactory =
    Arc<dyn Fn(&ShardContext) -> Result<Arc<dyn Shard>, ShardFailure> + Send + Sync>;

/// Immutable registration record for one shard
#[derive(Clone)]
pub struct ShardDefinition {
    id: String,
    dependency_ids: Vec<String>,
    factory: ShardFactory,
    init_timeout: Option<Duration>,
}

impl ShardDefinition {
    pub fn new<F>(id: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ShardContext) -> Result<Arc<dyn Shard>, ShardFailure> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            dependency_ids: Vec::new(),
            factory: Arc::new(factory),
            init_timeout: None,
        }
    }

    /// Declare a dependency. Repeated ids are collapsed.
    pub fn depends_on(mut self, dependency_id: impl Into<String>) -> Self {
        let dependency_id = dependency_id.into();
        if !self.dependency_ids.contains(&dependency_id) {
            self.dependency_ids.push(dependency_id);
        }
        self
    }

    /// Override the container's default init timeout for this shard
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dependency_ids(&self) -> &[String] {
        &self.dependency_ids
    }

    pub fn init_timeout(&self) -> Option<Duration> {
        self.init_timeout
    }

    pub(crate) fn factory(&self) -> ShardFactory {
        Arc::clone(&self.factory)
    }
}

impl fmt::Debug for ShardDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardDefinition")
            .field("id", &self.id)
            .field("dependency_ids", &self.dependency_ids)
            .field("init_timeout", &self.init_timeout)
            .finish_non_exhaustive()
    }
}

/// Typed handle to a Ready dependency
///
/// Dependencies are reached through the same operation and field surface
/// that remote processes use, so a shard never needs another shard's
/// concrete type.
#[derive(Clone)]
pub struct ShardHandle {
    id: String,
    router: CallRouter,
    bridge: StateSyncBridge,
}

impl ShardHandle {
    pub(crate) fn new(id: String, router: CallRouter, bridge: StateSyncBridge) -> Self {
        Self { id, router, bridge }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Invoke one of the dependency's operations in process
    pub async fn call(&self, operation: &str, args: Vec<Value>) -> Result<Value, CallError> {
        self.router.invoke(&self.id, operation, args).await
    }

    /// Current value of one of the dependency's observable fields
    pub fn field(&self, name: &str) -> Option<Value> {
        self.bridge.value(&self.id, name)
    }

    /// Current value of every observable field
    pub fn fields(&self) -> Option<FieldMap> {
        self.bridge.snapshot(&self.id)
    }
}

/// Everything a factory may touch while building its shard
pub struct ShardContext {
    id: String,
    dependencies: BTreeMap<String, ShardHandle>,
    bridge: StateSyncBridge,
    bus: EventBus,
}

impl ShardContext {
    pub(crate) fn new(
        id: String,
        dependencies: BTreeMap<String, ShardHandle>,
        bridge: StateSyncBridge,
        bus: EventBus,
    ) -> Self {
        Self {
            id,
            dependencies,
            bridge,
            bus,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Handle to a declared dependency
    pub fn dependency(&self, id: &str) -> Result<ShardHandle, ShardFailure> {
        self.dependencies
            .get(id)
            .cloned()
            .ok_or_else(|| ShardFailure::new(format!("'{id}' is not a declared dependency")))
    }

    /// Declare the fixed set of observable fields with their initial values
    pub fn observe<I, K>(&self, fields: I) -> Result<ObservableState, HostError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.bridge.declare(
            &self.id,
            fields.into_iter().map(|(name, value)| (name.into(), value)),
        )
    }

    /// Publisher for `"<shardId>/<event>"` topics
    pub fn events(&self) -> EventPublisher {
        EventPublisher::new(self.id.clone(), self.bus.clone())
    }
}
