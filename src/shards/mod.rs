//! Built-in shards
//!
//! Collaborators every host process carries: application-wide state and the
//! close negotiation that decides between hiding and quitting.

pub mod app_common;
pub mod close_policy;

use crate::error::{HostError, ShardFailure};
use crate::shard::ShardRegistry;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Register every built-in shard
pub fn register_builtin(registry: &mut ShardRegistry, version: &str) -> Result<(), HostError> {
    registry.register(app_common::definition(version))?;
    registry.register(close_policy::definition())?;
    Ok(())
}

/// Decode positional argument `index`
pub(crate) fn arg<T: DeserializeOwned>(
    args: &[Value],
    index: usize,
    name: &str,
) -> Result<T, ShardFailure> {
    let raw = args.get(index).cloned().unwrap_or(Value::Null);
    serde_json::from_value(raw)
        .map_err(|e| ShardFailure::new(format!("invalid argument '{name}': {e}")))
}

pub(crate) fn unhandled(operation: &str) -> ShardFailure {
    ShardFailure::new(format!("unhandled operation '{operation}'"))
}
