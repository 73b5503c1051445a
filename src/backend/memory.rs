//! In-memory store. Useful for tests and for running nmdb as a pure
//! cache with durable-tier semantics but no persistence.

use std::collections::BTreeMap;

/// Ordered in-memory map.
#[derive(Default)]
pub struct MemoryStore {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.map.get(key).cloned()
    }

    pub fn set(&mut self, key: &[u8], val: &[u8]) {
        self.map.insert(key.to_vec(), val.to_vec());
    }

    pub fn del(&mut self, key: &[u8]) -> bool {
        self.map.remove(key).is_some()
    }
}
