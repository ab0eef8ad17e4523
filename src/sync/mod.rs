//! Cross-process state synchronization
//!
//! The host side ([`StateSyncBridge`]) turns field mutations into ordered
//! snapshots and patches; the subscriber side ([`StateMirror`]) applies them
//! and detects sequence gaps.

pub mod bridge;
pub mod mirror;

pub use bridge::{ObservableState, StateSyncBridge};
pub use mirror::StateMirror;
