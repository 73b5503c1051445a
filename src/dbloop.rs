//! The database worker.
//!
//! One dedicated thread owns the backend store and drains the work
//! queue: wait on the queue's condition variable with a one-second
//! deadline, pop an entry, apply it, reply through the handle the entry
//! carries. The one-second tick exists only so stop detection never
//! takes long; asynchronous writes are happy to ride it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::backend::Store;
use crate::cache::{format_counter, parse_decimal};
use crate::proto;
use crate::queue::QueueEntry;
use crate::state::ServerState;

/// Handle to the running worker thread.
pub struct DbWorker {
    srv: Arc<ServerState>,
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

impl DbWorker {
    /// Ask the worker to stop, let it drain the queue, and join it.
    pub fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        // Wake it in case it is mid-wait on an empty queue.
        self.srv.queue.signal();
        if self.handle.join().is_err() {
            log::error!("database worker panicked");
        }
    }
}

/// Spawn the worker thread. It takes exclusive ownership of the store;
/// nothing else ever touches the backend.
pub fn spawn(srv: Arc<ServerState>, store: Store) -> std::io::Result<DbWorker> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    let thread_srv = Arc::clone(&srv);
    let handle = std::thread::Builder::new()
        .name("nmdb-db".to_string())
        .spawn(move || run(thread_srv, store, stop_flag))?;
    Ok(DbWorker { srv, handle, stop })
}

fn run(srv: Arc<ServerState>, mut store: Store, stop: Arc<AtomicBool>) {
    loop {
        let deadline = Instant::now() + Duration::from_secs(1);
        match srv.queue.get_wait(deadline) {
            Some(entry) => process_op(&srv, &mut store, entry),
            None => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
            }
        }
    }
    if let Err(e) = store.close() {
        log::error!("error closing backend: {}", e);
    }
}

fn process_op(srv: &ServerState, store: &mut Store, e: QueueEntry) {
    match e.op {
        proto::REQ_SET => {
            let rv = store.set(&e.key, &e.val);
            if e.flags & proto::FLAGS_SYNC == 0 {
                // Asynchronous write: the cache already reflects it and
                // the client was answered long ago.
                if let Err(err) = rv {
                    log::warn!("async set failed: {}", err);
                }
                return;
            }
            match rv {
                Ok(()) => e.replier.reply_mini(srv, proto::REP_OK),
                Err(err) => {
                    log::warn!("set failed: {}", err);
                    e.replier.reply_err(srv, proto::ERR_DB);
                }
            }
        }

        proto::REQ_GET => match store.get(&e.key) {
            Ok(Some(val)) => {
                srv.stats.db_hits.inc();
                e.replier.reply_value(srv, proto::REP_OK, &val);
            }
            Ok(None) => {
                srv.stats.db_misses.inc();
                e.replier.reply_mini(srv, proto::REP_NOTIN);
            }
            Err(err) => {
                log::warn!("get failed: {}", err);
                e.replier.reply_err(srv, proto::ERR_DB);
            }
        },

        proto::REQ_DEL => {
            let rv = store.del(&e.key);
            if e.flags & proto::FLAGS_SYNC == 0 {
                if let Err(err) = rv {
                    log::warn!("async del failed: {}", err);
                }
                return;
            }
            match rv {
                Ok(true) => e.replier.reply_mini(srv, proto::REP_OK),
                Ok(false) => e.replier.reply_mini(srv, proto::REP_NOTIN),
                Err(err) => {
                    log::warn!("del failed: {}", err);
                    e.replier.reply_err(srv, proto::ERR_DB);
                }
            }
        }

        proto::REQ_CAS => {
            let current = match store.get(&e.key) {
                Ok(v) => v,
                Err(err) => {
                    log::warn!("cas lookup failed: {}", err);
                    return e.replier.reply_err(srv, proto::ERR_DB);
                }
            };
            let Some(current) = current else {
                return e.replier.reply_mini(srv, proto::REP_NOTIN);
            };
            if current != e.val {
                return e.replier.reply_mini(srv, proto::REP_NOMATCH);
            }
            match store.set(&e.key, &e.newval) {
                Ok(()) => e.replier.reply_mini(srv, proto::REP_OK),
                Err(err) => {
                    log::warn!("cas store failed: {}", err);
                    e.replier.reply_err(srv, proto::ERR_DB);
                }
            }
        }

        proto::REQ_INCR => {
            let current = match store.get(&e.key) {
                Ok(v) => v,
                Err(err) => {
                    log::warn!("incr lookup failed: {}", err);
                    return e.replier.reply_err(srv, proto::ERR_DB);
                }
            };
            let Some(current) = current else {
                return e.replier.reply_mini(srv, proto::REP_NOTIN);
            };
            // Same contract as the cache: the stored value must carry
            // its NUL terminator to count as a counter.
            if current.last() != Some(&0) {
                return e.replier.reply_mini(srv, proto::REP_NOMATCH);
            }
            let Ok(delta_raw) = <[u8; 8]>::try_from(e.val.as_slice()) else {
                log::warn!("incr entry with malformed delta, dropped");
                return;
            };
            let delta = i64::from_be_bytes(delta_raw);
            let new = parse_decimal(&current[..current.len() - 1]).wrapping_add(delta);
            match store.set(&e.key, &format_counter(new)) {
                Ok(()) => e.replier.reply_value(srv, proto::REP_OK, &new.to_be_bytes()),
                Err(err) => {
                    log::warn!("incr store failed: {}", err);
                    e.replier.reply_err(srv, proto::ERR_DB);
                }
            }
        }

        op => {
            log::warn!("unknown queued operation 0x{:x}, dropped", op);
        }
    }
}
