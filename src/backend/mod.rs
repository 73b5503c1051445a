//! Pluggable backend stores.
//!
//! Every backend implements the same narrow contract: open, get, set,
//! del, close. The store is chosen once at startup by name and owned
//! exclusively by the database worker, so dispatch is a static enum
//! match and no backend locking exists anywhere.

use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

mod disk;
mod memory;
mod null;

pub use disk::DiskStore;
pub use memory::MemoryStore;
pub use null::NullStore;

/// Backend errors.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown backend \"{0}\"")]
    UnknownKind(String),
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// The supported store flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Log-structured on-disk store (the default).
    Sled,
    /// In-memory ordered map; contents vanish on shutdown.
    Memory,
    /// Accepts every write, misses every read.
    Null,
}

impl FromStr for BackendKind {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sled" => Ok(BackendKind::Sled),
            "memory" => Ok(BackendKind::Memory),
            "null" => Ok(BackendKind::Null),
            other => Err(BackendError::UnknownKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendKind::Sled => "sled",
            BackendKind::Memory => "memory",
            BackendKind::Null => "null",
        };
        f.write_str(name)
    }
}

/// A concrete store, dispatched statically.
pub enum Store {
    Sled(DiskStore),
    Memory(MemoryStore),
    Null(NullStore),
}

impl Store {
    /// Open the store of the given kind at `path` (ignored by the
    /// memory and null flavours).
    pub fn open(kind: BackendKind, path: &Path) -> BackendResult<Store> {
        match kind {
            BackendKind::Sled => Ok(Store::Sled(DiskStore::open(path)?)),
            BackendKind::Memory => Ok(Store::Memory(MemoryStore::new())),
            BackendKind::Null => Ok(Store::Null(NullStore)),
        }
    }

    pub fn get(&self, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        match self {
            Store::Sled(s) => s.get(key),
            Store::Memory(s) => Ok(s.get(key)),
            Store::Null(_) => Ok(None),
        }
    }

    pub fn set(&mut self, key: &[u8], val: &[u8]) -> BackendResult<()> {
        match self {
            Store::Sled(s) => s.set(key, val),
            Store::Memory(s) => {
                s.set(key, val);
                Ok(())
            }
            Store::Null(_) => Ok(()),
        }
    }

    /// Delete a key; returns whether it was present.
    pub fn del(&mut self, key: &[u8]) -> BackendResult<bool> {
        match self {
            Store::Sled(s) => s.del(key),
            Store::Memory(s) => Ok(s.del(key)),
            Store::Null(_) => Ok(false),
        }
    }

    /// Flush and release the store.
    pub fn close(self) -> BackendResult<()> {
        match self {
            Store::Sled(s) => s.close(),
            Store::Memory(_) | Store::Null(_) => Ok(()),
        }
    }
}
