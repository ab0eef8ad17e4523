//! Wire protocol
//!
//! Transport-agnostic envelopes exchanged between the host and every
//! connected process, plus the `"<shardId>/<member>"` channel convention.

pub mod channel;
pub mod envelope;

pub use channel::Channel;
pub use envelope::Envelope;
