//! Prometheus metrics module
//!
//! Every component records through the `metrics` facade. Without an
//! installed recorder the calls are no-ops, which is how the library and the
//! tests run.

use crate::error::HostError;
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;

/// Host metrics collector
#[derive(Clone, Default)]
pub struct HostMetrics {
    handle: Option<Arc<PrometheusHandle>>,
}

impl HostMetrics {
    /// Collector without an exporter
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Install the Prometheus recorder for this process and return the collector
    pub fn install() -> Result<Self, HostError> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| HostError::Metrics(e.to_string()))?;

        Self::register_metrics();

        Ok(Self {
            handle: Some(Arc::new(handle)),
        })
    }

    /// Register metric descriptions
    fn register_metrics() {
        describe_counter!(
            "host_calls_total",
            Unit::Count,
            "Operation calls dispatched, by shard, operation and outcome"
        );
        describe_counter!(
            "host_patches_sent_total",
            Unit::Count,
            "State patches delivered to subscribers"
        );
        describe_counter!(
            "host_snapshots_sent_total",
            Unit::Count,
            "Snapshots delivered on subscribe"
        );
        describe_counter!(
            "host_events_published_total",
            Unit::Count,
            "Events delivered to connected sessions"
        );
        describe_counter!(
            "host_errors_total",
            Unit::Count,
            "Host errors by type"
        );

        describe_histogram!(
            "host_shard_init_duration_seconds",
            Unit::Seconds,
            "Time from Initializing to settled for each shard"
        );

        describe_gauge!(
            "host_shards_ready",
            Unit::Count,
            "Number of shards in Ready state"
        );
        describe_gauge!(
            "host_sessions_connected",
            Unit::Count,
            "Connected subscriber sessions"
        );
    }

    /// Record a settled init (Ready or Failed)
    pub fn record_init(&self, shard_id: &str, duration: Duration, ok: bool) {
        histogram!(
            "host_shard_init_duration_seconds",
            "shard_id" => shard_id.to_string(),
            "outcome" => if ok { "ready" } else { "failed" }
        )
        .record(duration.as_secs_f64());
    }

    /// Record a dispatched call
    pub fn record_call(&self, shard_id: &str, operation: &str, outcome: &'static str) {
        counter!(
            "host_calls_total",
            "shard_id" => shard_id.to_string(),
            "operation" => operation.to_string(),
            "outcome" => outcome
        )
        .increment(1);
    }

    /// Record delivered patches
    pub fn record_patches(&self, shard_id: &str, delivered: usize) {
        counter!(
            "host_patches_sent_total",
            "shard_id" => shard_id.to_string()
        )
        .increment(delivered as u64);
    }

    /// Record a snapshot
    pub fn record_snapshot(&self, shard_id: &str) {
        counter!(
            "host_snapshots_sent_total",
            "shard_id" => shard_id.to_string()
        )
        .increment(1);
    }

    /// Record delivered events
    pub fn record_event(&self, topic: &str, delivered: usize) {
        counter!(
            "host_events_published_total",
            "topic" => topic.to_string()
        )
        .increment(delivered as u64);
    }

    /// Record host error
    pub fn record_error(&self, error_type: &'static str) {
        counter!(
            "host_errors_total",
            "error_type" => error_type
        )
        .increment(1);
    }

    /// Set ready shard count
    pub fn set_shards_ready(&self, count: usize) {
        gauge!("host_shards_ready").set(count as f64);
    }

    /// Set connected session count
    pub fn set_sessions(&self, count: usize) {
        gauge!("host_sessions_connected").set(count as f64);
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle
            .as_ref()
            .map(|handle| handle.render())
            .unwrap_or_default()
    }
}
