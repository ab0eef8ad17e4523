//! Subscriber-side copy of a shard's observable fields

use crate::error::HostError;
use crate::protocol::envelope::FieldMap;

#[derive(Debug, Clone, PartialEq)]
pub struct StateMirror {
    shard_id: String,
    sequence: u64,
    fields: FieldMap,
    resyncing: bool,
}

impl StateMirror {
    pub fn from_snapshot(shard_id: impl Into<String>, sequence: u64, fields: FieldMap) -> Self {
        Self {
            shard_id: shard_id.into(),
            sequence,
            fields,
            resyncing: false,
        }
    }

    /// Apply a patch that must be exactly one past the last sequence seen.
    ///
    /// On a gap the mirror stops applying patches until a fresh snapshot
    /// replaces it; patches arriving in the meantime are ignored.
    pub fn apply(&mut self, sequence: u64, fields: FieldMap) -> Result<bool, HostError> {
        if self.resyncing {
            return Ok(false);
        }
        let expected = self.sequence + 1;
        if sequence != expected {
            self.resyncing = true;
            return Err(HostError::SequenceGap {
                shard_id: self.shard_id.clone(),
                expected,
                received: sequence,
            });
        }
        self.sequence = sequence;
        self.fields.extend(fields);
        Ok(true)
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// True while waiting for a snapshot after a gap
    pub fn is_resyncing(&self) -> bool {
        self.resyncing
    }
}
