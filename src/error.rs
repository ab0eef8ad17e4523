//! Domain error types for the shard host
//!
//! Structured thiserror types for navigable diagnostics and compile-time
//! exhaustive handling.
//!
//! main.rs is the ONLY module allowed to use anyhow::Result (process boundary).
//! All library code returns Result<T, HostError>, and anything that crosses
//! the transport is a typed [`CallError`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Host domain errors
///
/// Every variant carries structured context fields for diagnostics.
///
/// Example log output:
/// ```text
/// HostError::MissingDependency { shard_id: "close-policy", missing_id: "app-common" }
/// → "shard 'close-policy' depends on unregistered shard 'app-common'"
/// ```
#[derive(Error, Debug)]
pub enum HostError {
    /// A declared dependency is not registered
    #[error("shard '{shard_id}' depends on unregistered shard '{missing_id}'")]
    MissingDependency { shard_id: String, missing_id: String },

    /// The dependency graph is not a DAG
    #[error("dependency cycle among shards: {}", .cycle.join(", "))]
    DependencyCycle { cycle: Vec<String> },

    /// Two definitions share an id
    #[error("shard '{shard_id}' is already registered")]
    DuplicateShard { shard_id: String },

    /// Init did not settle within the shard's timeout
    #[error("shard '{shard_id}' init timed out after {}ms", .timeout.as_millis())]
    InitTimeout { shard_id: String, timeout: Duration },

    /// Factory or init handler failed
    #[error("shard '{shard_id}' init failed")]
    InitFailure {
        shard_id: String,
        #[source]
        source: ShardFailure,
    },

    /// Skipped because a dependency failed
    #[error("shard '{shard_id}' skipped: dependency '{dependency_id}' failed")]
    DependencyFailed {
        shard_id: String,
        dependency_id: String,
    },

    /// Dispose handler failed (recorded, never fatal)
    #[error("shard '{shard_id}' dispose failed: {message}")]
    DisposeFailure { shard_id: String, message: String },

    /// Startup summary naming every failed shard
    #[error("initialization failed: {}", .failed.join(", "))]
    InitializationFailed { failed: Vec<String> },

    /// Container was already started
    #[error("shard container already started")]
    AlreadyStarted,

    /// Field was not part of the shard's declared observable set
    #[error("shard '{shard_id}' has no observable field '{field}'")]
    UndeclaredField { shard_id: String, field: String },

    /// Observable fields are fixed once declared
    #[error("shard '{shard_id}' already declared its observable fields")]
    FieldsAlreadyDeclared { shard_id: String },

    /// Subscribe target unknown or not Ready
    #[error("cannot subscribe to shard '{shard_id}': {reason}")]
    SubscribeRejected {
        shard_id: String,
        kind: CallErrorKind,
        reason: String,
    },

    /// Subscriber saw a patch that is not a clean increment
    #[error("sequence gap on shard '{shard_id}': expected {expected}, received {received}")]
    SequenceGap {
        shard_id: String,
        expected: u64,
        received: u64,
    },

    /// Envelope (de)serialization failed
    #[error("envelope serialization failed")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error (environment variable missing or invalid)
    #[error("configuration error: {0}")]
    Config(String),

    /// Metrics recorder could not be installed
    #[error("metrics recorder installation failed: {0}")]
    Metrics(String),
}

impl HostError {
    /// Returns a static label string suitable for Prometheus metrics.
    ///
    /// Used as the `error_type` label on `host_errors_total`.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::MissingDependency { .. } => "missing_dependency",
            Self::DependencyCycle { .. } => "dependency_cycle",
            Self::DuplicateShard { .. } => "duplicate_shard",
            Self::InitTimeout { .. } => "init_timeout",
            Self::InitFailure { .. } => "init_failure",
            Self::DependencyFailed { .. } => "dependency_failed",
            Self::DisposeFailure { .. } => "dispose_failure",
            Self::InitializationFailed { .. } => "initialization_failed",
            Self::AlreadyStarted => "already_started",
            Self::UndeclaredField { .. } => "undeclared_field",
            Self::FieldsAlreadyDeclared { .. } => "fields_already_declared",
            Self::SubscribeRejected { .. } => "subscribe_rejected",
            Self::SequenceGap { .. } => "sequence_gap",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
            Self::Metrics(_) => "metrics",
        }
    }
}

/// Failure raised by shard-authored code (factory, init, dispose, handlers)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ShardFailure {
    message: String,
}

impl ShardFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ShardFailure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ShardFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<HostError> for ShardFailure {
    fn from(err: HostError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<CallError> for ShardFailure {
    fn from(err: CallError) -> Self {
        Self::new(err.to_string())
    }
}

/// Kind tag carried by `call-error` and `subscribe-error` envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallErrorKind {
    /// No such shard or operation
    CallTargetNotFound,
    /// Shard exists but is not Ready
    ShardNotReady,
    /// The operation handler returned an error
    HandlerFailed,
    /// Caller gave up waiting (caller side only)
    CallTimeout,
    /// Transport closed while the call was outstanding
    TransportClosed,
}

impl CallErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallTargetNotFound => "CallTargetNotFound",
            Self::ShardNotReady => "ShardNotReady",
            Self::HandlerFailed => "HandlerFailed",
            Self::CallTimeout => "CallTimeout",
            Self::TransportClosed => "TransportClosed",
        }
    }
}

impl fmt::Display for CallErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed call failure, returned to the caller and never thrown across the transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct CallError {
    pub kind: CallErrorKind,
    pub message: String,
}

impl CallError {
    pub fn new(kind: CallErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn target_not_found(shard_id: &str, operation: &str) -> Self {
        Self::new(
            CallErrorKind::CallTargetNotFound,
            format!("no operation '{operation}' on shard '{shard_id}'"),
        )
    }

    pub fn transport_closed() -> Self {
        Self::new(CallErrorKind::TransportClosed, "transport closed")
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            CallErrorKind::CallTimeout,
            format!("no response after {}ms", after.as_millis()),
        )
    }
}
