//! State sync bridge
//!
//! Tracks each shard's declared observable fields, coalesces mutations made
//! within one scheduling tick into a single patch, and delivers patches to
//! every subscriber of that shard with a per-subscriber sequence number.

use crate::error::{CallErrorKind, HostError};
use crate::metrics::HostMetrics;
use crate::protocol::envelope::{Envelope, FieldMap};
use crate::shard::ShardTable;
use crate::transport::SessionId;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace, warn};

/// One subscriber of one shard
#[derive(Debug)]
struct Subscription {
    outbound: UnboundedSender<Envelope>,
    /// Sequence of the last snapshot or patch sent
    last_sequence: u64,
}

#[derive(Debug, Default)]
struct SyncEntry {
    declared: Vec<String>,
    values: FieldMap,
    pending: FieldMap,
    flush_scheduled: bool,
    subscribers: HashMap<SessionId, Subscription>,
}

impl SyncEntry {
    fn is_declared(&self, field: &str) -> bool {
        self.declared.iter().any(|f| f == field)
    }
}

#[derive(Clone)]
pub struct StateSyncBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    shards: DashMap<String, SyncEntry>,
    table: ShardTable,
    metrics: Arc<HostMetrics>,
}

impl StateSyncBridge {
    pub fn new(table: ShardTable, metrics: Arc<HostMetrics>) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                shards: DashMap::new(),
                table,
                metrics,
            }),
        }
    }

    /// Declare a shard's observable fields. The set is fixed afterwards.
    pub fn declare(
        &self,
        shard_id: &str,
        fields: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<ObservableState, HostError> {
        use dashmap::mapref::entry::Entry;

        match self.inner.shards.entry(shard_id.to_string()) {
            Entry::Occupied(_) => Err(HostError::FieldsAlreadyDeclared {
                shard_id: shard_id.to_string(),
            }),
            Entry::Vacant(vacant) => {
                let mut entry = SyncEntry::default();
                for (name, value) in fields {
                    if !entry.is_declared(&name) {
                        entry.declared.push(name.clone());
                    }
                    entry.values.insert(name, value);
                }
                debug!(shard_id, fields = ?entry.declared, "Observable fields declared");
                vacant.insert(entry);
                Ok(ObservableState {
                    shard_id: shard_id.to_string(),
                    bridge: self.clone(),
                })
            }
        }
    }

    /// Record a field mutation and schedule a flush for the current tick
    pub fn set(&self, shard_id: &str, field: &str, value: Value) -> Result<(), HostError> {
        let schedule = {
            let mut entry = self.inner.shards.get_mut(shard_id).ok_or_else(|| {
                HostError::UndeclaredField {
                    shard_id: shard_id.to_string(),
                    field: field.to_string(),
                }
            })?;
            if !entry.is_declared(field) {
                return Err(HostError::UndeclaredField {
                    shard_id: shard_id.to_string(),
                    field: field.to_string(),
                });
            }
            if entry.values.get(field) == Some(&value) {
                return Ok(());
            }
            entry.values.insert(field.to_string(), value.clone());
            entry.pending.insert(field.to_string(), value);

            let schedule = !entry.flush_scheduled;
            entry.flush_scheduled = true;
            schedule
        };

        if schedule {
            self.schedule_flush(shard_id);
        }
        Ok(())
    }

    /// Flush once the current task yields, so every mutation made in the same
    /// cooperative turn lands in one patch.
    fn schedule_flush(&self, shard_id: &str) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let bridge = self.clone();
                let shard_id = shard_id.to_string();
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    bridge.flush(&shard_id);
                });
            }
            Err(_) => {
                self.flush(shard_id);
            }
        }
    }

    /// Ship pending changes for one shard to all of its subscribers.
    /// Returns the number of patches delivered.
    pub fn flush(&self, shard_id: &str) -> usize {
        let Some(mut entry) = self.inner.shards.get_mut(shard_id) else {
            return 0;
        };
        entry.flush_scheduled = false;
        if entry.pending.is_empty() {
            return 0;
        }
        let changed = std::mem::take(&mut entry.pending);

        let mut closed = Vec::new();
        let mut delivered = 0;
        for (session_id, subscription) in entry.subscribers.iter_mut() {
            subscription.last_sequence += 1;
            let patch = Envelope::Patch {
                shard_id: shard_id.to_string(),
                sequence: subscription.last_sequence,
                fields: changed.clone(),
            };
            if subscription.outbound.send(patch).is_ok() {
                delivered += 1;
            } else {
                closed.push(*session_id);
            }
        }
        for session_id in closed {
            entry.subscribers.remove(&session_id);
            debug!(shard_id, %session_id, "Dropped subscriber with closed transport");
        }
        drop(entry);

        trace!(shard_id, fields = changed.len(), delivered, "Flushed state patch");
        self.inner.metrics.record_patches(shard_id, delivered);
        delivered
    }

    /// Subscribe a session to a Ready shard. Sends a snapshot tagged with the
    /// subscription's starting sequence and returns that sequence. Subscribing
    /// again restarts the sequence from a fresh snapshot.
    pub fn subscribe(
        &self,
        shard_id: &str,
        session_id: SessionId,
        outbound: UnboundedSender<Envelope>,
    ) -> Result<u64, HostError> {
        match self.inner.table.state(shard_id) {
            None => {
                return Err(HostError::SubscribeRejected {
                    shard_id: shard_id.to_string(),
                    kind: CallErrorKind::CallTargetNotFound,
                    reason: "unknown shard".to_string(),
                })
            }
            Some(state) if !state.is_ready() => {
                return Err(HostError::SubscribeRejected {
                    shard_id: shard_id.to_string(),
                    kind: CallErrorKind::ShardNotReady,
                    reason: format!("shard is {state}"),
                })
            }
            Some(_) => {}
        }

        let mut entry = self.inner.shards.entry(shard_id.to_string()).or_default();
        let sequence = 0;
        let snapshot = Envelope::Snapshot {
            shard_id: shard_id.to_string(),
            sequence,
            fields: entry.values.clone(),
        };
        if outbound.send(snapshot).is_err() {
            entry.subscribers.remove(&session_id);
            return Err(HostError::SubscribeRejected {
                shard_id: shard_id.to_string(),
                kind: CallErrorKind::TransportClosed,
                reason: "transport closed".to_string(),
            });
        }
        let restarted = entry
            .subscribers
            .insert(
                session_id,
                Subscription {
                    outbound,
                    last_sequence: sequence,
                },
            )
            .is_some();
        drop(entry);

        debug!(shard_id, %session_id, restarted, "Subscriber attached");
        self.inner.metrics.record_snapshot(shard_id);
        Ok(sequence)
    }

    /// Stop patch delivery to one session. Shard state is untouched.
    pub fn unsubscribe(&self, shard_id: &str, session_id: SessionId) -> bool {
        self.inner
            .shards
            .get_mut(shard_id)
            .map(|mut entry| entry.subscribers.remove(&session_id).is_some())
            .unwrap_or(false)
    }

    /// Drop every subscription held by a session
    pub fn drop_session(&self, session_id: SessionId) {
        for mut entry in self.inner.shards.iter_mut() {
            entry.subscribers.remove(&session_id);
        }
    }

    /// Forget a shard entirely (disposal or failed init)
    pub fn remove_shard(&self, shard_id: &str) {
        if let Some((_, entry)) = self.inner.shards.remove(shard_id) {
            if !entry.pending.is_empty() {
                warn!(shard_id, fields = entry.pending.len(), "Discarding unflushed changes");
            }
        }
    }

    /// Current value of one field
    pub fn value(&self, shard_id: &str, field: &str) -> Option<Value> {
        self.inner
            .shards
            .get(shard_id)
            .and_then(|entry| entry.values.get(field).cloned())
    }

    /// Current value of every declared field
    pub fn snapshot(&self, shard_id: &str) -> Option<FieldMap> {
        self.inner.shards.get(shard_id).map(|entry| entry.values.clone())
    }

    /// Declared field names in declaration order
    pub fn declared_fields(&self, shard_id: &str) -> Vec<String> {
        self.inner
            .shards
            .get(shard_id)
            .map(|entry| entry.declared.clone())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, shard_id: &str) -> usize {
        self.inner
            .shards
            .get(shard_id)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }
}

/// Setter handle a shard uses to mutate its own observable fields
#[derive(Clone)]
pub struct ObservableState {
    shard_id: String,
    bridge: StateSyncBridge,
}

impl ObservableState {
    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    /// Set a declared field. Setting the current value again is a no-op.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<(), HostError> {
        self.bridge.set(&self.shard_id, field, value.into())
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.bridge.value(&self.shard_id, field)
    }
}
