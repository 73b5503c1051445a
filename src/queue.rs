//! Deferred-operation queue between the network thread and the
//! database worker.
//!
//! An unbounded FIFO guarded by a mutex and a condition variable. The
//! dispatcher appends entries; the single worker pops them, waiting on
//! the condvar with an absolute deadline so a drifting clock cannot
//! oversleep. The dispatcher only signals for operations whose reply is
//! deferred to the worker; plain asynchronous writes are content to wait
//! for the worker's periodic tick.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::reply::Replier;

/// A deferred database operation. Key/value/newval are deep copies made
/// at parse time; the replier captures the originating connection so the
/// worker can answer directly.
pub struct QueueEntry {
    pub op: u16,
    pub flags: u16,
    pub key: Vec<u8>,
    pub val: Vec<u8>,
    pub newval: Vec<u8>,
    pub replier: Replier,
}

impl QueueEntry {
    pub fn new(op: u16, flags: u16, replier: Replier) -> QueueEntry {
        QueueEntry {
            op,
            flags,
            key: Vec::new(),
            val: Vec::new(),
            newval: Vec::new(),
            replier,
        }
    }
}

/// The operation queue. Writer: dispatcher. Reader: database worker.
pub struct WorkQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    cond: Condvar,
}

impl WorkQueue {
    pub fn new() -> WorkQueue {
        WorkQueue {
            entries: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
        }
    }

    /// Append an entry at the back of the queue.
    pub fn put(&self, e: QueueEntry) {
        self.entries.lock().push_back(e);
    }

    /// Pop the oldest entry without waiting.
    pub fn get(&self) -> Option<QueueEntry> {
        self.entries.lock().pop_front()
    }

    /// Pop the oldest entry, waiting on the condition variable until one
    /// is available or `deadline` passes. Returns `None` on timeout (or
    /// on a spurious wakeup racing another consumer, which the single
    /// worker never has).
    pub fn get_wait(&self, deadline: Instant) -> Option<QueueEntry> {
        let mut entries = self.entries.lock();
        while entries.is_empty() {
            if self.cond.wait_until(&mut entries, deadline).timed_out() {
                break;
            }
        }
        entries.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Wake one waiter.
    pub fn signal(&self) {
        self.cond.notify_one();
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        WorkQueue::new()
    }
}
