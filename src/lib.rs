//! Shard Host
//!
//! Hosts independently defined shards in one process:
//! - Resolves their dependency graph and brings them up in order, with
//!   independent branches initializing concurrently
//! - Mirrors each shard's observable fields to connected processes as
//!   ordered snapshots and patches
//! - Routes remote calls to shard operations and fans events out to every
//!   connected process
//! - Tears everything down in exact reverse order

pub mod config;
pub mod container;
pub mod error;
pub mod events;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod rpc;
pub mod shard;
pub mod shards;
pub mod sync;
pub mod transport;

pub use container::ShardContainer;
pub use error::{CallError, CallErrorKind, HostError, ShardFailure};
