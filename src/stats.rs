//! Server statistics.
//!
//! A fixed set of counters matching the STATS reply layout. Request
//! handlers bump them with relaxed atomics; exact totals under
//! concurrent increments are not required, the counters are
//! informational.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::proto::STATS_COUNTERS;

/// One statistics counter.
#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// All server counters, in STATS reply order.
#[derive(Default)]
pub struct Stats {
    pub cache_get: Counter,
    pub cache_set: Counter,
    pub cache_del: Counter,
    pub cache_cas: Counter,
    pub cache_incr: Counter,

    pub db_get: Counter,
    pub db_set: Counter,
    pub db_del: Counter,
    pub db_cas: Counter,
    pub db_incr: Counter,

    pub cache_hits: Counter,
    pub cache_misses: Counter,

    pub db_hits: Counter,
    pub db_misses: Counter,

    pub msg_tipc: Counter,
    pub msg_tcp: Counter,
    pub msg_udp: Counter,
    pub msg_sctp: Counter,

    pub net_version_mismatch: Counter,
    pub net_broken_req: Counter,
    pub net_unk_req: Counter,
}

impl Stats {
    pub fn new() -> Stats {
        Stats::default()
    }

    /// Snapshot every counter in wire order.
    pub fn snapshot(&self) -> [u64; STATS_COUNTERS] {
        [
            self.cache_get.get(),
            self.cache_set.get(),
            self.cache_del.get(),
            self.cache_cas.get(),
            self.cache_incr.get(),
            self.db_get.get(),
            self.db_set.get(),
            self.db_del.get(),
            self.db_cas.get(),
            self.db_incr.get(),
            self.cache_hits.get(),
            self.cache_misses.get(),
            self.db_hits.get(),
            self.db_misses.get(),
            self.msg_tipc.get(),
            self.msg_tcp.get(),
            self.msg_udp.get(),
            self.msg_sctp.get(),
            self.net_version_mismatch.get(),
            self.net_broken_req.get(),
            self.net_unk_req.get(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_order_matches_wire_layout() {
        let s = Stats::new();
        s.cache_get.inc();
        s.cache_get.inc();
        s.net_unk_req.inc();
        let snap = s.snapshot();
        assert_eq!(snap[0], 2);
        assert_eq!(snap[STATS_COUNTERS - 1], 1);
        assert_eq!(snap.iter().sum::<u64>(), 3);
    }
}
