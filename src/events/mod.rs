//! Event handling module
//!
//! One-way notifications from shards to every connected process.

pub mod bus;

pub use bus::{EventBus, EventPublisher};
