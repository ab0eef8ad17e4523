//! Channel naming
//!
//! Calls, fields and event topics are addressed as `"<shardId>/<member>"`.
//! Shard ids never contain a `/`, members may.

use std::fmt;

pub const SEPARATOR: char = '/';

/// A parsed `"<shardId>/<member>"` channel name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    pub shard_id: String,
    pub member: String,
}

impl Channel {
    pub fn new(shard_id: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            member: member.into(),
        }
    }

    /// Split at the first separator. Both halves must be non-empty.
    pub fn parse(name: &str) -> Option<Self> {
        let (shard_id, member) = name.split_once(SEPARATOR)?;
        if shard_id.is_empty() || member.is_empty() {
            return None;
        }
        Some(Self::new(shard_id, member))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.shard_id, SEPARATOR, self.member)
    }
}

/// Build a channel name without allocating a [`Channel`]
pub fn join(shard_id: &str, member: &str) -> String {
    format!("{shard_id}{SEPARATOR}{member}")
}

/// Shard ids are used as the first channel segment, so they must not be empty
/// or contain the separator.
pub fn is_valid_shard_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(SEPARATOR)
}
