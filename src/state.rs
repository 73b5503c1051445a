//! Shared server state.
//!
//! There are no globals: the cache, queue, counters and runtime flags
//! live in one [`ServerState`] handle built at startup and passed to
//! the event loop and the database worker.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::cache::Cache;
use crate::queue::WorkQueue;
use crate::settings::Settings;
use crate::stats::Stats;

/// The two runtime-mutable operational modes, toggled by signal.
pub struct RuntimeFlags {
    passive: AtomicBool,
    read_only: AtomicBool,
}

impl RuntimeFlags {
    fn new(passive: bool, read_only: bool) -> RuntimeFlags {
        RuntimeFlags {
            passive: AtomicBool::new(passive),
            read_only: AtomicBool::new(read_only),
        }
    }

    /// Passive mode: mutations proceed, replies are suppressed.
    pub fn passive(&self) -> bool {
        self.passive.load(Ordering::Relaxed)
    }

    /// Flip passive mode; returns the new value.
    pub fn toggle_passive(&self) -> bool {
        !self.passive.fetch_xor(true, Ordering::Relaxed)
    }

    /// Read-only mode: durable-tier writes are refused.
    pub fn read_only(&self) -> bool {
        self.read_only.load(Ordering::Relaxed)
    }

    /// Latch read-only mode on. Returns false if it was already set;
    /// there is no way back.
    pub fn latch_read_only(&self) -> bool {
        !self.read_only.swap(true, Ordering::Relaxed)
    }
}

/// Everything the dispatcher and the worker share.
pub struct ServerState {
    pub settings: Settings,
    pub flags: RuntimeFlags,
    pub stats: Stats,
    pub cache: Mutex<Cache>,
    pub queue: WorkQueue,
}

impl ServerState {
    pub fn new(settings: Settings) -> ServerState {
        let cache = Cache::new(settings.cache_entries);
        let flags = RuntimeFlags::new(settings.passive, settings.read_only);
        ServerState {
            settings,
            flags,
            stats: Stats::new(),
            cache: Mutex::new(cache),
            queue: WorkQueue::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passive_toggles_back_and_forth() {
        let f = RuntimeFlags::new(false, false);
        assert!(!f.passive());
        assert!(f.toggle_passive());
        assert!(f.passive());
        assert!(!f.toggle_passive());
        assert!(!f.passive());
    }

    #[test]
    fn read_only_latches() {
        let f = RuntimeFlags::new(false, false);
        assert!(f.latch_read_only());
        assert!(f.read_only());
        // Second latch reports no change and the mode stays on.
        assert!(!f.latch_read_only());
        assert!(f.read_only());
    }
}
