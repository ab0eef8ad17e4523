//! Caller side of the bridge
//!
//! Front-end processes talk to the host through a [`BridgeClient`]. It owns
//! correlation ids, enforces per-call timeouts, keeps a mirror of every
//! subscribed shard and guarantees each outstanding call resolves exactly
//! once, even when the transport drops mid-flight.

use crate::error::{CallError, HostError};
use crate::protocol::envelope::{Envelope, FieldMap};
use crate::sync::StateMirror;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Default caller-side timeout for a call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Notice capacity; slow notice readers observe `Lagged`
const NOTICE_CAPACITY: usize = 256;

/// Things the client observed on its inbound side
#[derive(Debug, Clone, PartialEq)]
pub enum ClientNotice {
    /// A snapshot replaced the shard's mirror
    Snapshot { shard_id: String, sequence: u64 },
    /// A patch was applied cleanly
    Patch { shard_id: String, sequence: u64 },
    /// A gap was detected; a fresh snapshot has been requested
    Resync {
        shard_id: String,
        expected: u64,
        received: u64,
    },
    /// The host refused a subscribe
    SubscribeRejected { shard_id: String, message: String },
    /// One-way event from a shard
    Event { topic: String, payload: Value },
    /// The transport is gone
    Closed,
}

type PendingCall = oneshot::Sender<Result<Value, CallError>>;

#[derive(Clone)]
pub struct BridgeClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    outbound: Mutex<Option<UnboundedSender<Envelope>>>,
    pending: DashMap<String, PendingCall>,
    mirrors: DashMap<String, StateMirror>,
    notices: broadcast::Sender<ClientNotice>,
    closed: CancellationToken,
    call_timeout: Option<Duration>,
}

impl BridgeClient {
    /// Start a client over an envelope channel pair. Must be called inside a
    /// tokio runtime; the inbound side is read by a spawned task.
    pub fn new(outbound: UnboundedSender<Envelope>, inbound: UnboundedReceiver<Envelope>) -> Self {
        Self::with_call_timeout(outbound, inbound, Some(DEFAULT_CALL_TIMEOUT))
    }

    /// Like [`BridgeClient::new`] with an explicit default call timeout
    /// (`None` waits forever unless the transport closes).
    pub fn with_call_timeout(
        outbound: UnboundedSender<Envelope>,
        inbound: UnboundedReceiver<Envelope>,
        call_timeout: Option<Duration>,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let inner = Arc::new(ClientInner {
            outbound: Mutex::new(Some(outbound)),
            pending: DashMap::new(),
            mirrors: DashMap::new(),
            notices,
            closed: CancellationToken::new(),
            call_timeout,
        });

        tokio::spawn(read_loop(Arc::clone(&inner), inbound));

        Self { inner }
    }

    /// Call with the client's default timeout
    pub async fn call(
        &self,
        shard_id: &str,
        operation: &str,
        args: Vec<Value>,
    ) -> Result<Value, CallError> {
        self.call_with_timeout(shard_id, operation, args, self.inner.call_timeout)
            .await
    }

    /// Call with an explicit timeout. On timeout the correlation id is
    /// abandoned and a late response for it is discarded.
    pub async fn call_with_timeout(
        &self,
        shard_id: &str,
        operation: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, CallError> {
        let correlation_id = Uuid::new_v4().to_string();
        let (tx, mut rx) = oneshot::channel();
        self.inner.pending.insert(correlation_id.clone(), tx);

        // A close that raced with the insert would never drain this entry
        if self.inner.closed.is_cancelled() && self.inner.pending.remove(&correlation_id).is_some()
        {
            return Err(CallError::transport_closed());
        }

        let envelope = Envelope::Call {
            shard_id: shard_id.to_string(),
            operation: operation.to_string(),
            args,
            correlation_id: correlation_id.clone(),
        };
        if !self.inner.send(envelope).await
            && self.inner.pending.remove(&correlation_id).is_some()
        {
            return Err(CallError::transport_closed());
        }
        trace!(shard_id, operation, %correlation_id, "Call sent");

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut rx).await {
                Ok(received) => received,
                Err(_) => {
                    if self.inner.pending.remove(&correlation_id).is_some() {
                        debug!(shard_id, operation, %correlation_id, "Call timed out");
                        return Err(CallError::timeout(limit));
                    }
                    // The response won the race; it is already in the channel
                    rx.await
                }
            },
            None => rx.await,
        };

        received.unwrap_or_else(|_| Err(CallError::transport_closed()))
    }

    /// Ask the host for a snapshot and subsequent patches of a shard
    pub async fn subscribe(&self, shard_id: &str) -> Result<(), CallError> {
        let sent = self
            .inner
            .send(Envelope::Subscribe {
                shard_id: shard_id.to_string(),
            })
            .await;
        if sent {
            Ok(())
        } else {
            Err(CallError::transport_closed())
        }
    }

    /// Stop receiving patches and drop the local mirror
    pub async fn unsubscribe(&self, shard_id: &str) {
        self.inner.mirrors.remove(shard_id);
        self.inner
            .send(Envelope::Unsubscribe {
                shard_id: shard_id.to_string(),
            })
            .await;
    }

    /// Mirrored field values of a subscribed shard
    pub fn fields(&self, shard_id: &str) -> Option<FieldMap> {
        self.inner
            .mirrors
            .get(shard_id)
            .map(|mirror| mirror.fields().clone())
    }

    /// Last applied sequence of a subscribed shard
    pub fn sequence(&self, shard_id: &str) -> Option<u64> {
        self.inner.mirrors.get(shard_id).map(|mirror| mirror.sequence())
    }

    pub fn notices(&self) -> broadcast::Receiver<ClientNotice> {
        self.inner.notices.subscribe()
    }

    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Wait until the transport is gone
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await;
    }

    /// Close the transport from this side. Outstanding calls fail with
    /// `TransportClosed`.
    pub async fn close(&self) {
        self.inner.shutdown().await;
    }
}

impl ClientInner {
    async fn send(&self, envelope: Envelope) -> bool {
        match self.outbound.lock().await.as_ref() {
            Some(outbound) => outbound.send(envelope).is_ok(),
            None => false,
        }
    }

    fn notify(&self, notice: ClientNotice) {
        // No receivers is fine
        let _ = self.notices.send(notice);
    }

    fn resolve(&self, correlation_id: &str, outcome: Result<Value, CallError>) {
        match self.pending.remove(correlation_id) {
            Some((_, tx)) => {
                let _ = tx.send(outcome);
            }
            None => debug!(correlation_id, "Discarding response for abandoned call"),
        }
    }

    async fn handle(&self, envelope: Envelope) {
        match envelope {
            Envelope::CallResult {
                correlation_id,
                result,
            } => self.resolve(&correlation_id, Ok(result)),

            Envelope::CallError {
                correlation_id,
                kind,
                message,
            } => self.resolve(&correlation_id, Err(CallError::new(kind, message))),

            Envelope::Snapshot {
                shard_id,
                sequence,
                fields,
            } => {
                self.mirrors.insert(
                    shard_id.clone(),
                    StateMirror::from_snapshot(shard_id.clone(), sequence, fields),
                );
                self.notify(ClientNotice::Snapshot { shard_id, sequence });
            }

            Envelope::Patch {
                shard_id,
                sequence,
                fields,
            } => {
                let applied = match self.mirrors.get_mut(&shard_id) {
                    Some(mut mirror) => mirror.apply(sequence, fields),
                    None => {
                        trace!(shard_id, sequence, "Patch for unsubscribed shard ignored");
                        return;
                    }
                };
                match applied {
                    Ok(true) => self.notify(ClientNotice::Patch { shard_id, sequence }),
                    Ok(false) => trace!(shard_id, sequence, "Patch ignored while resyncing"),
                    Err(HostError::SequenceGap {
                        expected, received, ..
                    }) => {
                        warn!(shard_id, expected, received, "Sequence gap, requesting snapshot");
                        self.send(Envelope::Subscribe {
                            shard_id: shard_id.clone(),
                        })
                        .await;
                        self.notify(ClientNotice::Resync {
                            shard_id,
                            expected,
                            received,
                        });
                    }
                    Err(err) => warn!(shard_id, error = %err, "Patch rejected"),
                }
            }

            Envelope::SubscribeError {
                shard_id, message, ..
            } => {
                self.mirrors.remove(&shard_id);
                self.notify(ClientNotice::SubscribeRejected { shard_id, message });
            }

            Envelope::Event { topic, payload } => {
                self.notify(ClientNotice::Event { topic, payload })
            }

            other => warn!(kind = other.kind(), "Unexpected envelope from host"),
        }
    }

    /// Idempotent: the first caller drains pending calls
    async fn shutdown(&self) {
        self.closed.cancel();
        let had_transport = self.outbound.lock().await.take().is_some();

        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(CallError::transport_closed()));
                failed += 1;
            }
        }

        if had_transport {
            debug!(failed_calls = failed, "Bridge client closed");
            self.notify(ClientNotice::Closed);
        }
    }
}

async fn read_loop(inner: Arc<ClientInner>, mut inbound: UnboundedReceiver<Envelope>) {
    loop {
        tokio::select! {
            envelope = inbound.recv() => match envelope {
                Some(envelope) => inner.handle(envelope).await,
                None => break,
            },
            _ = inner.closed.cancelled() => break,
        }
    }
    inner.shutdown().await;
}
