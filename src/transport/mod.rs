//! Transports
//!
//! Every connected process gets one host-side [`Session`]. Sessions speak
//! [`Envelope`](crate::protocol::Envelope)s; the local transport carries them
//! over in-process channels and the WebSocket transport as JSON text frames.

pub mod local;
pub mod session;
pub mod ws;

pub use session::{Session, SessionRegistry};

/// Identifies one connected process for the lifetime of its connection
pub type SessionId = uuid::Uuid;
