//! Scientific-data container metadata (§3). The bytes themselves live in shared memory (or,
//! out of process, are fetched by the [`DataManager`](crate::data_manager::DataManager)); this
//! module only models the metadata a [`ClusterManager`](crate::cluster_manager::ClusterManager)
//! needs to route and replay objects.

use serde::{Deserialize, Serialize};

use crate::id::Id;
use crate::message::Generation;

/// Everything the manager needs to know about an object without looking at its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub creator: Id,
    pub generation: Generation,
    pub block: Option<u32>,
    pub timestep: i32,
    pub num_blocks: u32,
    pub num_timesteps: i32,
    pub real_time: Option<i64>,
    pub attributes: Vec<(String, String)>,
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>, creator: Id, generation: Generation) -> Self {
        ObjectMeta {
            name: name.into(),
            creator,
            generation,
            block: None,
            timestep: -1,
            num_blocks: 1,
            num_timesteps: -1,
            real_time: None,
            attributes: Vec::new(),
        }
    }

    pub fn with_block(mut self, block: u32) -> Self {
        self.block = Some(block);
        self
    }

    pub fn with_timestep(mut self, timestep: i32) -> Self {
        self.timestep = timestep;
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.attributes.push((key, value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_attribute_overwrites_existing_key() {
        let mut meta = ObjectMeta::new("obj", Id::new(1000), Generation { execution_count: 0, iteration: 0 });
        meta.set_attribute("species", "a");
        meta.set_attribute("species", "b");
        assert_eq!(meta.attribute("species"), Some("b"));
        assert_eq!(meta.attributes.len(), 1);
    }
}
