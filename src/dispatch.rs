//! Request dispatcher.
//!
//! Runs on the network thread. Applies the cache-then-queue policy:
//! every request mutates the cache synchronously, and requests that
//! also touch the durable tier enqueue a copy for the database worker.
//! The reply is emitted here when this side is authoritative
//! (cache-only operations, asynchronous durable writes, STATS) and
//! deferred to the worker otherwise.

use std::sync::Arc;

use crate::cache::{CasOutcome, IncrOutcome};
use crate::proto::{self, HeaderError, Request};
use crate::queue::QueueEntry;
use crate::reply::Replier;
use crate::state::ServerState;

/// Copy bytes with an explicit error edge instead of aborting on
/// exhaustion, so the hot path can answer ERR/MEM.
fn copy_bytes(src: &[u8]) -> Result<Vec<u8>, ()> {
    let mut v = Vec::new();
    if v.try_reserve_exact(src.len()).is_err() {
        return Err(());
    }
    v.extend_from_slice(src);
    Ok(v)
}

fn broken(srv: &ServerState, replier: &Replier) {
    srv.stats.net_broken_req.inc();
    replier.reply_err(srv, proto::ERR_BROKEN);
}

fn out_of_memory(srv: &ServerState, replier: &Replier) {
    replier.reply_err(srv, proto::ERR_MEM);
}

/// Handle one complete message (stream length prefix already
/// stripped). Consumes the replier: it is either answered here or
/// handed to the worker inside a queue entry.
pub fn dispatch(srv: &Arc<ServerState>, msg: &[u8], mut replier: Replier) {
    let req = match proto::parse_request(msg) {
        Ok(req) => req,
        Err(HeaderError::TooShort) => {
            // Not even a header; there is no id to reply with.
            srv.stats.net_broken_req.inc();
            return;
        }
        Err(HeaderError::Version { id }) => {
            srv.stats.net_version_mismatch.inc();
            replier.id = id;
            replier.reply_err(srv, proto::ERR_VER);
            return;
        }
    };
    replier.id = req.id;

    match req.cmd {
        proto::REQ_GET => handle_get(srv, &req, replier),
        proto::REQ_SET => handle_set(srv, &req, replier),
        proto::REQ_DEL => handle_del(srv, &req, replier),
        proto::REQ_CAS => handle_cas(srv, &req, replier),
        proto::REQ_INCR => handle_incr(srv, &req, replier),
        proto::REQ_STATS => handle_stats(srv, &req, replier),
        _ => {
            // FIRSTKEY/NEXTKEY land here too: reserved, not served.
            srv.stats.net_unk_req.inc();
            replier.reply_err(srv, proto::ERR_UNKREQ);
        }
    }
}

fn cache_only(req: &Request<'_>) -> bool {
    req.flags & proto::FLAGS_CACHE_ONLY != 0
}

fn sync(req: &Request<'_>) -> bool {
    req.flags & proto::FLAGS_SYNC != 0
}

/// Durable-tier writes are refused while read-only mode is latched;
/// the cache tier stays writable through cache-only requests.
fn refuse_read_only(srv: &ServerState, req: &Request<'_>, replier: &Replier) -> bool {
    if !cache_only(req) && srv.flags.read_only() {
        replier.reply_err(srv, proto::ERR_RO);
        return true;
    }
    false
}

fn handle_get(srv: &Arc<ServerState>, req: &Request<'_>, replier: Replier) {
    let Ok(key) = proto::parse_key(req.payload) else {
        return broken(srv, &replier);
    };
    if cache_only(req) {
        srv.stats.cache_get.inc();
    } else {
        srv.stats.db_get.inc();
    }

    {
        let cache = srv.cache.lock();
        if let Some(val) = cache.get(key) {
            srv.stats.cache_hits.inc();
            return replier.reply_value(srv, proto::REP_CACHE_HIT, val);
        }
    }

    if cache_only(req) {
        srv.stats.cache_misses.inc();
        replier.reply_mini(srv, proto::REP_CACHE_MISS);
    } else {
        let Ok(kcopy) = copy_bytes(key) else {
            return out_of_memory(srv, &replier);
        };
        let mut e = QueueEntry::new(proto::REQ_GET, req.flags, replier);
        e.key = kcopy;
        srv.queue.put(e);
        srv.queue.signal();
    }
}

fn handle_set(srv: &Arc<ServerState>, req: &Request<'_>, replier: Replier) {
    let Ok((key, val)) = proto::parse_key_value(req.payload) else {
        return broken(srv, &replier);
    };
    if cache_only(req) {
        srv.stats.cache_set.inc();
    } else {
        srv.stats.db_set.inc();
    }
    if refuse_read_only(srv, req, &replier) {
        return;
    }

    if srv.cache.lock().set(key, val).is_err() {
        return out_of_memory(srv, &replier);
    }

    if cache_only(req) {
        return replier.reply_mini(srv, proto::REP_OK);
    }

    let (Ok(kcopy), Ok(vcopy)) = (copy_bytes(key), copy_bytes(val)) else {
        return out_of_memory(srv, &replier);
    };
    // Asynchronous writes are acknowledged right away; synchronous ones
    // wake the worker and let it answer once the backend has.
    if !sync(req) {
        replier.reply_mini(srv, proto::REP_OK);
    }
    let mut e = QueueEntry::new(proto::REQ_SET, req.flags, replier);
    e.key = kcopy;
    e.val = vcopy;
    srv.queue.put(e);
    if sync(req) {
        srv.queue.signal();
    }
}

fn handle_del(srv: &Arc<ServerState>, req: &Request<'_>, replier: Replier) {
    let Ok(key) = proto::parse_key(req.payload) else {
        return broken(srv, &replier);
    };
    if cache_only(req) {
        srv.stats.cache_del.inc();
    } else {
        srv.stats.db_del.inc();
    }
    if refuse_read_only(srv, req, &replier) {
        return;
    }

    let hit = srv.cache.lock().del(key);

    if cache_only(req) {
        let code = if hit { proto::REP_OK } else { proto::REP_NOTIN };
        return replier.reply_mini(srv, code);
    }

    let Ok(kcopy) = copy_bytes(key) else {
        return out_of_memory(srv, &replier);
    };
    if !sync(req) {
        replier.reply_mini(srv, proto::REP_OK);
    }
    let mut e = QueueEntry::new(proto::REQ_DEL, req.flags, replier);
    e.key = kcopy;
    srv.queue.put(e);
    if sync(req) {
        srv.queue.signal();
    }
}

fn handle_cas(srv: &Arc<ServerState>, req: &Request<'_>, replier: Replier) {
    let Ok((key, oldval, newval)) = proto::parse_cas(req.payload) else {
        return broken(srv, &replier);
    };
    if cache_only(req) {
        srv.stats.cache_cas.inc();
    } else {
        srv.stats.db_cas.inc();
    }
    if refuse_read_only(srv, req, &replier) {
        return;
    }

    let outcome = match srv.cache.lock().cas(key, oldval, newval) {
        Ok(outcome) => outcome,
        Err(_) => return out_of_memory(srv, &replier),
    };

    // A cache mismatch answers NOMATCH without consulting the backend,
    // even for durable requests. After an eviction this can disagree
    // with the backend's actual value; the cache view wins here.
    if outcome == CasOutcome::Mismatch {
        return replier.reply_mini(srv, proto::REP_NOMATCH);
    }

    if cache_only(req) {
        let code = match outcome {
            CasOutcome::Swapped => proto::REP_OK,
            CasOutcome::Missing => proto::REP_NOTIN,
            CasOutcome::Mismatch => unreachable!(),
        };
        return replier.reply_mini(srv, code);
    }

    let (Ok(kcopy), Ok(ocopy), Ok(ncopy)) =
        (copy_bytes(key), copy_bytes(oldval), copy_bytes(newval))
    else {
        return out_of_memory(srv, &replier);
    };
    let mut e = QueueEntry::new(proto::REQ_CAS, req.flags, replier);
    e.key = kcopy;
    e.val = ocopy;
    e.newval = ncopy;
    srv.queue.put(e);
    srv.queue.signal();
}

fn handle_incr(srv: &Arc<ServerState>, req: &Request<'_>, replier: Replier) {
    let Ok((key, delta)) = proto::parse_incr(req.payload) else {
        return broken(srv, &replier);
    };
    if cache_only(req) {
        srv.stats.cache_incr.inc();
    } else {
        srv.stats.db_incr.inc();
    }
    if refuse_read_only(srv, req, &replier) {
        return;
    }

    let outcome = match srv.cache.lock().incr(key, delta) {
        Ok(outcome) => outcome,
        Err(_) => return out_of_memory(srv, &replier),
    };

    // A value without its terminator is not a counter; tell the client
    // without bothering the backend.
    if outcome == IncrOutcome::NotNumeric {
        return replier.reply_mini(srv, proto::REP_NOMATCH);
    }

    if cache_only(req) {
        return match outcome {
            IncrOutcome::Incremented(new) => {
                replier.reply_value(srv, proto::REP_OK, &new.to_be_bytes())
            }
            IncrOutcome::Missing => replier.reply_mini(srv, proto::REP_NOTIN),
            IncrOutcome::NotNumeric => unreachable!(),
        };
    }

    // Whether the cache incremented or missed, the backend result is
    // the authoritative one; the worker replies.
    let Ok(kcopy) = copy_bytes(key) else {
        return out_of_memory(srv, &replier);
    };
    let mut e = QueueEntry::new(proto::REQ_INCR, req.flags, replier);
    e.key = kcopy;
    e.val = delta.to_be_bytes().to_vec();
    srv.queue.put(e);
    srv.queue.signal();
}

fn handle_stats(srv: &Arc<ServerState>, _req: &Request<'_>, replier: Replier) {
    let counters = srv.stats.snapshot();
    replier.reply_stats(srv, &counters);
}
