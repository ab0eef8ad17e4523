//! Host-side sessions
//!
//! A session dispatches the envelopes one connected process sends and owns
//! everything attached on its behalf: field subscriptions, the event bus
//! subscription and in-flight call tasks. Closing the session drops all of
//! them.

use super::SessionId;
use crate::error::{CallErrorKind, HostError};
use crate::events::EventBus;
use crate::metrics::HostMetrics;
use crate::protocol::envelope::Envelope;
use crate::rpc::CallRouter;
use crate::sync::StateSyncBridge;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Open sessions plus the components they dispatch to
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: DashMap<SessionId, Arc<SessionInner>>,
    router: CallRouter,
    bridge: StateSyncBridge,
    bus: EventBus,
    metrics: Arc<HostMetrics>,
}

impl SessionRegistry {
    pub fn new(
        router: CallRouter,
        bridge: StateSyncBridge,
        bus: EventBus,
        metrics: Arc<HostMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                router,
                bridge,
                bus,
                metrics,
            }),
        }
    }

    /// Open a session whose host → subscriber envelopes go to `outbound`.
    /// The session is subscribed to the event bus immediately.
    pub fn open(&self, outbound: UnboundedSender<Envelope>) -> Session {
        let id = Uuid::new_v4();
        let inner = Arc::new(SessionInner {
            id,
            outbound: outbound.clone(),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            registry: Arc::clone(&self.inner),
        });

        self.inner.bus.subscribe(id, outbound);
        self.inner.sessions.insert(id, Arc::clone(&inner));
        self.inner.metrics.set_sessions(self.inner.sessions.len());
        info!(session_id = %id, "Session opened");

        Session { inner }
    }

    /// Close every open session
    pub fn close_all(&self) -> usize {
        let open: Vec<Arc<SessionInner>> = self
            .inner
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let count = open.len();
        for session in open {
            session.close();
        }
        count
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.inner.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn count(&self) -> usize {
        self.inner.sessions.len()
    }
}

/// One connected process. Dropping the session closes it.
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: SessionId,
    outbound: UnboundedSender<Envelope>,
    cancel: CancellationToken,
    closed: AtomicBool,
    registry: Arc<RegistryInner>,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Cancelled when the session closes from either side
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Dispatch one subscriber → host envelope
    pub fn handle(&self, envelope: Envelope) {
        if self.is_closed() {
            trace!(
                session_id = %self.inner.id,
                kind = envelope.kind(),
                "Envelope after close ignored"
            );
            return;
        }
        match envelope {
            Envelope::Call {
                shard_id,
                operation,
                args,
                correlation_id,
            } => self.inner.dispatch_call(shard_id, operation, args, correlation_id),
            Envelope::Subscribe { shard_id } => self.inner.subscribe(&shard_id),
            Envelope::Unsubscribe { shard_id } => {
                let removed = self.inner.registry.bridge.unsubscribe(&shard_id, self.inner.id);
                debug!(session_id = %self.inner.id, shard_id, removed, "Unsubscribed");
            }
            other => warn!(
                session_id = %self.inner.id,
                kind = other.kind(),
                "Ignoring host-bound envelope of unexpected type"
            ),
        }
    }

    /// Idempotent
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl SessionInner {
    fn send(&self, envelope: Envelope) {
        if self.outbound.send(envelope).is_err() {
            trace!(session_id = %self.id, "Outbound closed, envelope dropped");
        }
    }

    fn dispatch_call(
        &self,
        shard_id: String,
        operation: String,
        args: Vec<serde_json::Value>,
        correlation_id: String,
    ) {
        let router = &self.registry.router;
        // Unknown targets are answered without yielding
        if let Err(err) = router.resolve(&shard_id, &operation) {
            debug!(
                session_id = %self.id,
                shard_id,
                operation,
                %correlation_id,
                kind = %err.kind,
                "Call rejected"
            );
            self.registry
                .metrics
                .record_call(&shard_id, &operation, "rejected");
            self.send(Envelope::call_response(correlation_id, Err(err)));
            return;
        }

        let router = router.clone();
        let outbound = self.outbound.clone();
        let cancel = self.cancel.clone();
        let session_id = self.id;
        tokio::spawn(async move {
            tokio::select! {
                outcome = router.invoke(&shard_id, &operation, args) => {
                    trace!(
                        %session_id,
                        shard_id,
                        operation,
                        %correlation_id,
                        ok = outcome.is_ok(),
                        "Call settled"
                    );
                    let _ = outbound.send(Envelope::call_response(correlation_id, outcome));
                }
                _ = cancel.cancelled() => {
                    debug!(
                        %session_id,
                        shard_id,
                        operation,
                        %correlation_id,
                        "Call abandoned, session closed"
                    );
                }
            }
        });
    }

    fn subscribe(&self, shard_id: &str) {
        match self
            .registry
            .bridge
            .subscribe(shard_id, self.id, self.outbound.clone())
        {
            Ok(sequence) => {
                debug!(session_id = %self.id, shard_id, sequence, "Subscribed");
            }
            Err(err) => {
                let kind = match &err {
                    HostError::SubscribeRejected { kind, .. } => *kind,
                    _ => CallErrorKind::CallTargetNotFound,
                };
                debug!(session_id = %self.id, shard_id, error = %err, "Subscribe rejected");
                self.registry.metrics.record_error(err.error_type_label());
                self.send(Envelope::SubscribeError {
                    shard_id: shard_id.to_string(),
                    kind,
                    message: err.to_string(),
                });
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.registry.bridge.drop_session(self.id);
        self.registry.bus.unsubscribe(self.id);
        self.registry.sessions.remove(&self.id);
        self.registry
            .metrics
            .set_sessions(self.registry.sessions.len());
        info!(session_id = %self.id, "Session closed");
    }
}
