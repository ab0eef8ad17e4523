//! Envelope serialization
//!
//! One JSON object per message, discriminated by `type`. The same enum is
//! used for in-process channels and for serialized frames on the WebSocket
//! transport.

use crate::error::{CallError, CallErrorKind, HostError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field name → value map carried by snapshots and patches
pub type FieldMap = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Envelope {
    /// Subscriber → host: invoke `operation` on `shard_id`
    Call {
        #[serde(rename = "shardId")]
        shard_id: String,
        operation: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(rename = "correlationId")]
        correlation_id: String,
    },

    /// Host → subscriber: successful call
    CallResult {
        #[serde(rename = "correlationId")]
        correlation_id: String,
        #[serde(default)]
        result: Value,
    },

    /// Host → subscriber: failed call
    CallError {
        #[serde(rename = "correlationId")]
        correlation_id: String,
        kind: CallErrorKind,
        message: String,
    },

    /// Subscriber → host: start (or restart) field sync for a shard
    Subscribe {
        #[serde(rename = "shardId")]
        shard_id: String,
    },

    /// Host → subscriber: full field state
    Snapshot {
        #[serde(rename = "shardId")]
        shard_id: String,
        sequence: u64,
        fields: FieldMap,
    },

    /// Host → subscriber: incremental field changes
    Patch {
        #[serde(rename = "shardId")]
        shard_id: String,
        sequence: u64,
        fields: FieldMap,
    },

    /// Host → subscriber: subscribe could not be honoured
    SubscribeError {
        #[serde(rename = "shardId")]
        shard_id: String,
        kind: CallErrorKind,
        message: String,
    },

    /// Host → subscriber: one-way notification
    Event {
        topic: String,
        #[serde(default)]
        payload: Value,
    },

    /// Subscriber → host: stop field sync for a shard
    Unsubscribe {
        #[serde(rename = "shardId")]
        shard_id: String,
    },
}

impl Envelope {
    /// Response envelope for a finished call
    pub fn call_response(correlation_id: String, outcome: Result<Value, CallError>) -> Self {
        match outcome {
            Ok(result) => Envelope::CallResult {
                correlation_id,
                result,
            },
            Err(err) => Envelope::CallError {
                correlation_id,
                kind: err.kind,
                message: err.message,
            },
        }
    }

    /// Value of the `type` tag, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Call { .. } => "call",
            Envelope::CallResult { .. } => "call-result",
            Envelope::CallError { .. } => "call-error",
            Envelope::Subscribe { .. } => "subscribe",
            Envelope::Snapshot { .. } => "snapshot",
            Envelope::Patch { .. } => "patch",
            Envelope::SubscribeError { .. } => "subscribe-error",
            Envelope::Event { .. } => "event",
            Envelope::Unsubscribe { .. } => "unsubscribe",
        }
    }

    pub fn to_json(&self) -> Result<String, HostError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, HostError> {
        Ok(serde_json::from_str(text)?)
    }
}
