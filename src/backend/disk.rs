//! On-disk store backed by sled.

use std::path::Path;

use super::BackendResult;

/// Durable log-structured store.
pub struct DiskStore {
    db: sled::Db,
}

impl DiskStore {
    pub fn open(path: &Path) -> BackendResult<DiskStore> {
        let db = sled::open(path)?;
        Ok(DiskStore { db })
    }

    pub fn get(&self, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    pub fn set(&mut self, key: &[u8], val: &[u8]) -> BackendResult<()> {
        self.db.insert(key, val)?;
        Ok(())
    }

    pub fn del(&mut self, key: &[u8]) -> BackendResult<bool> {
        Ok(self.db.remove(key)?.is_some())
    }

    pub fn close(self) -> BackendResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
