//! Event bus
//!
//! Fire-and-forget notifications from shards to connected sessions. Events
//! go to whoever is connected at publish time; nothing is queued for
//! sessions that connect later.

use crate::metrics::HostMetrics;
use crate::protocol::channel;
use crate::protocol::envelope::Envelope;
use crate::transport::SessionId;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace};

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

struct EventBusInner {
    subscribers: DashMap<SessionId, UnboundedSender<Envelope>>,
    metrics: Arc<HostMetrics>,
}

impl EventBus {
    pub fn new(metrics: Arc<HostMetrics>) -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                subscribers: DashMap::new(),
                metrics,
            }),
        }
    }

    pub fn subscribe(&self, session_id: SessionId, outbound: UnboundedSender<Envelope>) {
        self.inner.subscribers.insert(session_id, outbound);
    }

    pub fn unsubscribe(&self, session_id: SessionId) -> bool {
        self.inner.subscribers.remove(&session_id).is_some()
    }

    /// Deliver to every connected session. Returns how many received it;
    /// zero subscribers is not an error.
    pub fn publish(&self, topic: &str, payload: Value) -> usize {
        let mut closed = Vec::new();
        let mut delivered = 0;
        for entry in self.inner.subscribers.iter() {
            let event = Envelope::Event {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            if entry.value().send(event).is_ok() {
                delivered += 1;
            } else {
                closed.push(*entry.key());
            }
        }
        for session_id in closed {
            self.inner.subscribers.remove(&session_id);
            debug!(%session_id, "Dropped event subscriber with closed transport");
        }

        trace!(topic, delivered, "Event published");
        self.inner.metrics.record_event(topic, delivered);
        delivered
    }

    /// Deliver to one session only
    pub fn publish_to(&self, session_id: SessionId, topic: &str, payload: Value) -> bool {
        let Some(outbound) = self.inner.subscribers.get(&session_id).map(|e| e.value().clone())
        else {
            return false;
        };
        let delivered = outbound
            .send(Envelope::Event {
                topic: topic.to_string(),
                payload,
            })
            .is_ok();
        if !delivered {
            self.inner.subscribers.remove(&session_id);
        }
        self.inner.metrics.record_event(topic, usize::from(delivered));
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

/// Per-shard publisher that prefixes topics with the shard id
#[derive(Clone)]
pub struct EventPublisher {
    shard_id: String,
    bus: EventBus,
}

impl EventPublisher {
    pub fn new(shard_id: String, bus: EventBus) -> Self {
        Self { shard_id, bus }
    }

    /// Publish `"<shardId>/<event>"` to every connected session
    pub fn publish(&self, event: &str, payload: impl Into<Value>) -> usize {
        self.bus
            .publish(&channel::join(&self.shard_id, event), payload.into())
    }

    /// Publish `"<shardId>/<event>"` to one session
    pub fn publish_to(
        &self,
        session_id: SessionId,
        event: &str,
        payload: impl Into<Value>,
    ) -> bool {
        self.bus.publish_to(
            session_id,
            &channel::join(&self.shard_id, event),
            payload.into(),
        )
    }
}
