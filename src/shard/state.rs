//! Shard lifecycle tracking
//!
//! The table is written only by the lifecycle coordinator; the router, the
//! sync bridge and the health endpoints read it to gate their own behaviour.

use crate::error::{HostError, ShardFailure};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Lifecycle state for a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Definition registered, nothing started
    Registered,
    /// Dependency resolution in progress
    Resolving,
    /// Factory and init running
    Initializing,
    /// Serving calls and subscriptions
    Ready,
    /// Dispose running
    Disposing,
    /// Dispose finished
    Disposed,
    /// Failed before reaching Ready
    Failed,
}

impl LifecycleState {
    /// Returns true if the shard accepts calls and subscriptions
    pub fn is_ready(&self) -> bool {
        matches!(self, LifecycleState::Ready)
    }

    /// Returns true once the shard will never change state again
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Disposed | LifecycleState::Failed)
    }

    /// Legal transitions: the happy path, Failed from anywhere before Ready,
    /// and Ready → Disposing → Disposed.
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Registered, Resolving)
                | (Resolving, Initializing)
                | (Initializing, Ready)
                | (Registered | Resolving | Initializing, Failed)
                | (Ready, Disposing)
                | (Disposing, Disposed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Registered => "registered",
            LifecycleState::Resolving => "resolving",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Ready => "ready",
            LifecycleState::Disposing => "disposing",
            LifecycleState::Disposed => "disposed",
            LifecycleState::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a shard ended up Failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Startup aborted because resolution failed
    ResolutionAborted,
    /// Init exceeded its timeout
    InitTimeout { timeout: Duration },
    /// Factory or init returned an error (or panicked)
    InitFailure(String),
    /// A dependency failed, so this shard was never started
    DependencyFailed(String),
}

impl FailureReason {
    /// Domain error for a shard that failed with this reason
    pub fn to_error(&self, shard_id: &str) -> HostError {
        let shard_id = shard_id.to_string();
        match self {
            FailureReason::InitTimeout { timeout } => HostError::InitTimeout {
                shard_id,
                timeout: *timeout,
            },
            FailureReason::DependencyFailed(dependency_id) => HostError::DependencyFailed {
                shard_id,
                dependency_id: dependency_id.clone(),
            },
            FailureReason::InitFailure(_) | FailureReason::ResolutionAborted => {
                HostError::InitFailure {
                    shard_id,
                    source: ShardFailure::new(self.to_string()),
                }
            }
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ResolutionAborted => write!(f, "dependency resolution failed"),
            FailureReason::InitTimeout { timeout } => {
                write!(f, "init timed out after {}ms", timeout.as_millis())
            }
            FailureReason::InitFailure(message) => write!(f, "init failed: {message}"),
            FailureReason::DependencyFailed(id) => write!(f, "dependency '{id}' failed"),
        }
    }
}

/// State for a single shard
#[derive(Debug)]
pub struct ShardEntry {
    /// Registration position, used to keep reports deterministic
    pub index: usize,
    pub state: LifecycleState,
    pub failure: Option<FailureReason>,
    pub calls_handled: AtomicU64,
    pub init_started_at: Option<Instant>,
    pub ready_at: Option<Instant>,
}

impl ShardEntry {
    fn new(index: usize) -> Self {
        Self {
            index,
            state: LifecycleState::Registered,
            failure: None,
            calls_handled: AtomicU64::new(0),
            init_started_at: None,
            ready_at: None,
        }
    }
}

/// Shared lifecycle table across all shards in a container
#[derive(Debug, Clone, Default)]
pub struct ShardTable {
    inner: Arc<DashMap<String, ShardEntry>>,
}

impl ShardTable {
    /// Create a table with every shard in `Registered`
    pub fn new<'a>(shard_ids: impl Iterator<Item = &'a str>) -> Self {
        let shards = DashMap::new();
        for (index, shard_id) in shard_ids.enumerate() {
            shards.insert(shard_id.to_string(), ShardEntry::new(index));
        }
        Self {
            inner: Arc::new(shards),
        }
    }

    /// Move a shard to `next`. Illegal transitions are refused and logged.
    pub(crate) fn set_state(&self, shard_id: &str, next: LifecycleState) -> bool {
        let Some(mut entry) = self.inner.get_mut(shard_id) else {
            return false;
        };
        if !entry.state.can_transition_to(next) {
            warn!(
                shard_id,
                from = %entry.state,
                to = %next,
                "Refusing illegal lifecycle transition"
            );
            return false;
        }
        entry.state = next;
        match next {
            LifecycleState::Initializing => entry.init_started_at = Some(Instant::now()),
            LifecycleState::Ready => entry.ready_at = Some(Instant::now()),
            _ => {}
        }
        true
    }

    /// Mark a shard Failed with a reason. Returns false if it was already
    /// past the point where failing is legal.
    pub(crate) fn fail(&self, shard_id: &str, reason: FailureReason) -> bool {
        let Some(mut entry) = self.inner.get_mut(shard_id) else {
            return false;
        };
        if !entry.state.can_transition_to(LifecycleState::Failed) {
            return false;
        }
        entry.state = LifecycleState::Failed;
        entry.failure = Some(reason);
        true
    }

    /// Increment handled-call counter
    pub(crate) fn record_call(&self, shard_id: &str) {
        if let Some(entry) = self.inner.get(shard_id) {
            entry.calls_handled.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get lifecycle state for a specific shard
    pub fn state(&self, shard_id: &str) -> Option<LifecycleState> {
        self.inner.get(shard_id).map(|e| e.state)
    }

    /// Get the failure reason for a Failed shard
    pub fn failure(&self, shard_id: &str) -> Option<FailureReason> {
        self.inner.get(shard_id).and_then(|e| e.failure.clone())
    }

    /// Time spent between Initializing and Ready
    pub fn init_duration(&self, shard_id: &str) -> Option<Duration> {
        let entry = self.inner.get(shard_id)?;
        Some(entry.ready_at?.duration_since(entry.init_started_at?))
    }

    pub fn calls_handled(&self, shard_id: &str) -> u64 {
        self.inner
            .get(shard_id)
            .map(|e| e.calls_handled.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn contains(&self, shard_id: &str) -> bool {
        self.inner.contains_key(shard_id)
    }

    /// Every failed shard with its reason, in registration order
    pub fn failed(&self) -> Vec<(String, FailureReason)> {
        let mut failed: Vec<(usize, String, FailureReason)> = self
            .inner
            .iter()
            .filter_map(|e| {
                e.failure
                    .clone()
                    .map(|reason| (e.index, e.key().clone(), reason))
            })
            .collect();
        failed.sort_by_key(|(index, _, _)| *index);
        failed.into_iter().map(|(_, id, reason)| (id, reason)).collect()
    }

    /// Get count of ready shards
    pub fn ready_shards(&self) -> usize {
        self.inner.iter().filter(|e| e.state.is_ready()).count()
    }

    /// Get total shard count
    pub fn shard_count(&self) -> usize {
        self.inner.len()
    }

    /// Check if every shard is ready
    pub fn is_ready(&self) -> bool {
        self.shard_count() > 0 && self.ready_shards() == self.shard_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        use LifecycleState::*;
        let path = [Registered, Resolving, Initializing, Ready, Disposing, Disposed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn ready_shards_cannot_fail() {
        let table = ShardTable::new(["a"].into_iter());
        assert!(table.set_state("a", LifecycleState::Resolving));
        assert!(table.set_state("a", LifecycleState::Initializing));
        assert!(table.set_state("a", LifecycleState::Ready));
        assert!(!table.fail("a", FailureReason::InitFailure("late".into())));
        assert_eq!(table.state("a"), Some(LifecycleState::Ready));
        assert!(table.init_duration("a").is_some());
    }

    #[test]
    fn skipping_states_is_refused() {
        let table = ShardTable::new(["a"].into_iter());
        assert!(!table.set_state("a", LifecycleState::Ready));
        assert_eq!(table.state("a"), Some(LifecycleState::Registered));
    }

    #[test]
    fn failed_is_reported_in_registration_order() {
        let table = ShardTable::new(["a", "b", "c"].into_iter());
        table.fail("c", FailureReason::DependencyFailed("b".into()));
        table.fail("b", FailureReason::InitFailure("boom".into()));

        let failed: Vec<String> = table.failed().into_iter().map(|(id, _)| id).collect();
        assert_eq!(failed, vec!["b", "c"]);
        assert!(!table.is_ready());
    }
}
