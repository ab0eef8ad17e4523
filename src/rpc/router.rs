//! Call router
//!
//! Maps `(shardId, operation)` to the Ready shard that handles it. The
//! router imposes no mutual exclusion: concurrent calls to one shard run
//! concurrently unless the shard serializes them itself.

use crate::error::{CallError, CallErrorKind};
use crate::metrics::HostMetrics;
use crate::shard::{Shard, ShardTable};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct CallRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    routes: DashMap<String, Arc<dyn Shard>>,
    table: ShardTable,
    metrics: Arc<HostMetrics>,
}

impl CallRouter {
    pub fn new(table: ShardTable, metrics: Arc<HostMetrics>) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                routes: DashMap::new(),
                table,
                metrics,
            }),
        }
    }

    /// Expose a shard's operations. Called by the coordinator on Ready.
    pub(crate) fn register(&self, shard_id: &str, instance: Arc<dyn Shard>) {
        debug!(shard_id, operations = ?instance.operations(), "Operations registered");
        self.inner.routes.insert(shard_id.to_string(), instance);
    }

    /// Withdraw a shard's operations. Called by the coordinator before dispose.
    pub(crate) fn unregister(&self, shard_id: &str) {
        self.inner.routes.remove(shard_id);
    }

    /// Find the handler for a call without awaiting anything, so unknown
    /// targets are rejected immediately.
    pub fn resolve(&self, shard_id: &str, operation: &str) -> Result<Arc<dyn Shard>, CallError> {
        let Some(instance) = self.inner.routes.get(shard_id).map(|r| Arc::clone(r.value())) else {
            return Err(match self.inner.table.state(shard_id) {
                Some(state) if !state.is_ready() => CallError::new(
                    CallErrorKind::ShardNotReady,
                    format!("shard '{shard_id}' is {state}"),
                ),
                _ => CallError::target_not_found(shard_id, operation),
            });
        };

        if !instance.operations().iter().any(|op| *op == operation) {
            return Err(CallError::target_not_found(shard_id, operation));
        }

        match self.inner.table.state(shard_id) {
            Some(state) if state.is_ready() => Ok(instance),
            Some(state) => Err(CallError::new(
                CallErrorKind::ShardNotReady,
                format!("shard '{shard_id}' is {state}"),
            )),
            None => Err(CallError::target_not_found(shard_id, operation)),
        }
    }

    /// Resolve and run one call
    pub async fn invoke(
        &self,
        shard_id: &str,
        operation: &str,
        args: Vec<Value>,
    ) -> Result<Value, CallError> {
        let instance = match self.resolve(shard_id, operation) {
            Ok(instance) => instance,
            Err(err) => {
                self.inner
                    .metrics
                    .record_call(shard_id, operation, outcome_label(err.kind));
                return Err(err);
            }
        };

        self.inner.table.record_call(shard_id);
        let outcome = instance.call(operation, args).await.map_err(|failure| {
            warn!(shard_id, operation, error = %failure, "Operation handler failed");
            CallError::new(CallErrorKind::HandlerFailed, failure.message())
        });

        let label = match &outcome {
            Ok(_) => "ok",
            Err(err) => outcome_label(err.kind),
        };
        self.inner.metrics.record_call(shard_id, operation, label);
        outcome
    }

    /// Operation names currently routable for a shard
    pub fn operations(&self, shard_id: &str) -> Vec<&'static str> {
        self.inner
            .routes
            .get(shard_id)
            .map(|r| r.value().operations().to_vec())
            .unwrap_or_default()
    }
}

fn outcome_label(kind: CallErrorKind) -> &'static str {
    match kind {
        CallErrorKind::CallTargetNotFound => "not_found",
        CallErrorKind::ShardNotReady => "not_ready",
        CallErrorKind::HandlerFailed => "handler_failed",
        CallErrorKind::CallTimeout => "timeout",
        CallErrorKind::TransportClosed => "transport_closed",
    }
}
