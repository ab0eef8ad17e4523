//! Shard container
//!
//! Owns the registry and wires the lifecycle coordinator, state sync bridge,
//! call router, event bus and session registry together. The container is
//! shared behind an `Arc` by the HTTP server and the process entry point.

use crate::config::LifecycleConfig;
use crate::error::HostError;
use crate::events::EventBus;
use crate::metrics::HostMetrics;
use crate::protocol::envelope::Envelope;
use crate::rpc::{BridgeClient, CallRouter, DEFAULT_CALL_TIMEOUT};
use crate::shard::{DisposalReport, LifecycleCoordinator, ShardRegistry, ShardTable, StartupReport};
use crate::sync::StateSyncBridge;
use crate::transport::{local, Session, SessionRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

pub struct ShardContainer {
    registry: ShardRegistry,
    table: ShardTable,
    bridge: StateSyncBridge,
    router: CallRouter,
    bus: EventBus,
    sessions: SessionRegistry,
    coordinator: LifecycleCoordinator,
    metrics: Arc<HostMetrics>,
}

impl ShardContainer {
    /// Container with metrics recording disabled
    pub fn new(registry: ShardRegistry, config: LifecycleConfig) -> Self {
        Self::with_metrics(registry, config, Arc::new(HostMetrics::disabled()))
    }

    pub fn with_metrics(
        registry: ShardRegistry,
        config: LifecycleConfig,
        metrics: Arc<HostMetrics>,
    ) -> Self {
        let table = ShardTable::new(registry.iter().map(|definition| definition.id()));
        let bridge = StateSyncBridge::new(table.clone(), Arc::clone(&metrics));
        let router = CallRouter::new(table.clone(), Arc::clone(&metrics));
        let bus = EventBus::new(Arc::clone(&metrics));
        let sessions = SessionRegistry::new(
            router.clone(),
            bridge.clone(),
            bus.clone(),
            Arc::clone(&metrics),
        );
        let coordinator = LifecycleCoordinator::new(
            table.clone(),
            bridge.clone(),
            router.clone(),
            bus.clone(),
            Arc::clone(&metrics),
            config,
        );

        Self {
            registry,
            table,
            bridge,
            router,
            bus,
            sessions,
            coordinator,
            metrics,
        }
    }

    /// Resolve dependencies and initialize every shard. See
    /// [`LifecycleCoordinator::start`].
    pub async fn start(&self) -> Result<StartupReport, HostError> {
        info!(shards = self.registry.len(), "Starting shard container");
        self.coordinator.start(&self.registry).await
    }

    /// Close every session, then dispose shards in reverse init order
    pub async fn dispose(&self) -> DisposalReport {
        let closed = self.close_sessions();
        if closed > 0 {
            info!(sessions = closed, "Sessions closed for teardown");
        }
        self.coordinator.dispose().await
    }

    /// Open a host-side session for a transport that delivers to `outbound`
    pub fn open_session(&self, outbound: mpsc::UnboundedSender<Envelope>) -> Session {
        self.sessions.open(outbound)
    }

    /// Connect an in-process client with the default call timeout
    pub fn connect_local(&self) -> BridgeClient {
        self.connect_local_with_timeout(Some(DEFAULT_CALL_TIMEOUT))
    }

    /// Connect an in-process client. Must be called inside a tokio runtime.
    pub fn connect_local_with_timeout(&self, call_timeout: Option<Duration>) -> BridgeClient {
        let (to_host, from_client) = mpsc::unbounded_channel();
        let (to_client, from_host) = mpsc::unbounded_channel();
        let session = self.open_session(to_client);
        local::serve(session, from_client);
        BridgeClient::with_call_timeout(to_host, from_host, call_timeout)
    }

    /// Close every open session. In-flight calls on them are abandoned and
    /// their callers see `TransportClosed`.
    pub fn close_sessions(&self) -> usize {
        self.sessions.close_all()
    }

    pub fn registry(&self) -> &ShardRegistry {
        &self.registry
    }

    pub fn table(&self) -> &ShardTable {
        &self.table
    }

    pub fn bridge(&self) -> &StateSyncBridge {
        &self.bridge
    }

    pub fn router(&self) -> &CallRouter {
        &self.router
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn metrics(&self) -> &Arc<HostMetrics> {
        &self.metrics
    }
}
