//! Shard registry
//!
//! Plain registration and lookup. The container takes the registry by value,
//! which closes registration before resolution begins.

use crate::error::HostError;
use crate::protocol::channel;
use crate::shard::definition::ShardDefinition;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ShardRegistry {
    definitions: Vec<ShardDefinition>,
    index: HashMap<String, usize>,
}

impl ShardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition. Ids must be unique and usable as a channel segment.
    pub fn register(&mut self, definition: ShardDefinition) -> Result<(), HostError> {
        let id = definition.id().to_string();
        if !channel::is_valid_shard_id(&id) {
            return Err(HostError::Config(format!(
                "invalid shard id '{id}': must be non-empty and contain no '{}'",
                channel::SEPARATOR
            )));
        }
        if self.index.contains_key(&id) {
            return Err(HostError::DuplicateShard { shard_id: id });
        }
        self.index.insert(id, self.definitions.len());
        self.definitions.push(definition);
        Ok(())
    }

    /// Builder-style [`ShardRegistry::register`]
    pub fn with(mut self, definition: ShardDefinition) -> Result<Self, HostError> {
        self.register(definition)?;
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Option<&ShardDefinition> {
        self.index.get(id).map(|&i| &self.definitions[i])
    }

    /// Registration position of a shard
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Definitions in registration order
    pub fn iter(&self) -> impl Iterator<Item = &ShardDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
