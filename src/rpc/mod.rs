//! Remote calls
//!
//! Host-side routing of `(shardId, operation)` calls and the caller-side
//! client that correlates responses.

pub mod client;
pub mod router;

pub use client::{BridgeClient, ClientNotice, DEFAULT_CALL_TIMEOUT};
pub use router::CallRouter;
