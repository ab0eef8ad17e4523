//! Shard management module
//!
//! Registration, dependency resolution and lifecycle of shards.

pub mod coordinator;
pub mod definition;
pub mod registry;
pub mod resolver;
pub mod state;

pub use coordinator::{DisposalReport, LifecycleCoordinator, StartupReport};
pub use definition::{Shard, ShardContext, ShardDefinition, ShardFactory, ShardHandle};
pub use registry::ShardRegistry;
pub use state::{FailureReason, LifecycleState, ShardTable};
