//! Reject cache: remembers recently rejected client addresses so that a
//! reconnecting client is turned away before any protocol work is done.
//!
//! Entries are full-length prefixes in one tree per address family, carrying
//! the time of the last offence. A periodic sweep expires them after
//! `reject_ban_time`; connections caught by [`RejectCache::check`] are queued
//! and closed on a later tick by [`RejectCache::flush_pending`], never while
//! the caller is still handling them.

use crate::config::RejectConfig;
use crate::constants::{FLUSH_TASK_NAME, REJECT_EXIT_REASON, SWEEP_TASK_NAME};
use crate::errors::Error;
use crate::ports::{Clock, Disconnect, Scheduler, SystemClock};
use crate::prefix::{Family, Prefix};
use crate::trie::Trie;
use crate::types::NodeId;
use crossbeam_queue::SegQueue;
use log::{debug, error, info, trace, warn};
use metrics::{counter, gauge};
use std::cell::RefCell;
use std::net::IpAddr;
use std::rc::Rc;

/// Payload stored on every cached address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejectEntry {
    /// Clock seconds of the most recent offence or matched reconnect.
    pub last_seen: u64,
    /// Offences recorded through `add`.
    pub count: u32,
}

pub struct RejectCache<H, C = SystemClock> {
    v4: Trie<RejectEntry>,
    v6: Trie<RejectEntry>,
    pending: SegQueue<H>,
    config: RejectConfig,
    clock: C,
}

impl<H> RejectCache<H, SystemClock> {
    pub fn new(config: RejectConfig) -> Result<Self, Error> {
        Self::with_clock(config, SystemClock)
    }
}

impl<H, C: Clock> RejectCache<H, C> {
    pub fn with_clock(config: RejectConfig, clock: C) -> Result<Self, Error> {
        config.validate()?;
        let (v4, v6) = match config.capacity {
            Some(cap) => (
                Trie::with_capacity(Family::V4, cap)?,
                Trie::with_capacity(Family::V6, cap)?,
            ),
            None => (Trie::new(Family::V4), Trie::new(Family::V6)),
        };
        info!(
            "[REJECT] Cache ready: ban_time={}s after_count={} capacity={:?}",
            config.reject_ban_time, config.reject_after_count, config.capacity
        );
        Ok(Self {
            v4,
            v6,
            pending: SegQueue::new(),
            config,
            clock,
        })
    }

    pub fn config(&self) -> &RejectConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn tree(&self, family: Family) -> &Trie<RejectEntry> {
        match family {
            Family::V4 => &self.v4,
            Family::V6 => &self.v6,
        }
    }

    fn tree_mut(&mut self, family: Family) -> &mut Trie<RejectEntry> {
        match family {
            Family::V4 => &mut self.v4,
            Family::V6 => &mut self.v6,
        }
    }

    fn report_size(&self) {
        gauge!("addrcache_entries").set(self.len() as f64);
    }

    /// Record an offence by `ip`, creating the entry or refreshing it.
    ///
    /// A `CapacityExceeded` error means the node pool is exhausted; the tree
    /// is intact but the host should treat it as fatal.
    pub fn add(&mut self, ip: IpAddr) -> Result<(), Error> {
        if !self.config.enabled() {
            return Ok(());
        }
        let now = self.clock.now();
        let prefix = Prefix::from_ip(ip);
        let tree = self.tree_mut(prefix.family());
        let id = match tree.lookup_or_insert(&prefix) {
            Ok(id) => id,
            Err(e) => {
                error!("[REJECT] Cannot record {}: {}", prefix, e);
                return Err(e);
            }
        };
        let count = match tree.get_mut(id) {
            Some(entry) => {
                entry.last_seen = now;
                entry.count = entry.count.saturating_add(1);
                entry.count
            }
            None => {
                // lookup_or_insert only hands back concrete nodes
                if tree.set(id, RejectEntry { last_seen: now, count: 1 }).is_err() {
                    unreachable!("[REJECT] insert of {prefix} returned glue node {id:?}");
                }
                1
            }
        };
        counter!("addrcache_rejects_total").increment(1);
        debug!("[REJECT] Recorded {} (count={}, t={})", prefix, count, now);
        self.report_size();
        Ok(())
    }

    /// Is `ip` currently rejected? On a hit the entry is refreshed and
    /// `handle` is queued for a deferred close; the caller must stop
    /// processing the connection.
    pub fn check(&mut self, ip: IpAddr, handle: H) -> bool {
        if !self.config.enabled() {
            return false;
        }
        let now = self.clock.now();
        let after = self.config.reject_after_count;
        let prefix = Prefix::from_ip(ip);
        let tree = self.tree_mut(prefix.family());
        let Some(id) = tree.search_best(&prefix, true) else {
            return false;
        };
        let Some(entry) = tree.get_mut(id) else {
            return false;
        };
        entry.last_seen = now;
        if entry.count < after {
            trace!(
                "[CHECK] {} seen {} time(s), below threshold {}",
                prefix,
                entry.count,
                after
            );
            return false;
        }
        self.pending.push(handle);
        counter!("addrcache_hits_total").increment(1);
        debug!("[CHECK] {} rejected from cache, disconnect queued", prefix);
        true
    }

    /// Remove every entry whose last offence is more than `reject_ban_time`
    /// seconds old. Returns the number of entries removed.
    pub fn sweep(&mut self) -> usize {
        let now = self.clock.now();
        let ban = self.config.reject_ban_time;
        let mut removed = 0;
        for family in [Family::V4, Family::V6] {
            let tree = self.tree_mut(family);
            let stale: Vec<NodeId> = tree
                .iter()
                .filter(|(_, _, e)| e.is_some_and(|e| e.last_seen.saturating_add(ban) < now))
                .map(|(id, _, _)| id)
                .collect();
            for id in stale {
                // removals only ever free glue, so the other collected ids stay valid
                tree.remove(id);
                removed += 1;
            }
        }
        if removed > 0 {
            counter!("addrcache_evictions_total").increment(removed as u64);
            info!("[SWEEP] Expired {} entries (t={})", removed, now);
        } else {
            trace!("[SWEEP] Nothing to expire (t={})", now);
        }
        self.report_size();
        removed
    }

    /// Close every queued connection, oldest first. Returns how many.
    pub fn flush_pending<D: Disconnect<H>>(&mut self, disconnect: &mut D) -> usize {
        let mut closed = 0;
        while let Some(handle) = self.pending.pop() {
            disconnect.close(handle, REJECT_EXIT_REASON);
            closed += 1;
        }
        if closed > 0 {
            counter!("addrcache_disconnects_total").increment(closed as u64);
            debug!("[EXIT] Closed {} rejected connections", closed);
        }
        closed
    }

    /// Forget a single address. Returns whether it was cached.
    pub fn remove_ip(&mut self, ip: IpAddr) -> bool {
        let prefix = Prefix::from_ip(ip);
        let found = self.tree_mut(prefix.family()).remove_prefix(&prefix).is_some();
        if found {
            debug!("[REJECT] Removed {}", prefix);
            self.report_size();
        }
        found
    }

    /// Forget every cached address inside `mask`, e.g. when a ban on that
    /// range is lifted. Returns the number of entries removed.
    pub fn remove_mask(&mut self, mask: &Prefix) -> usize {
        let tree = self.tree_mut(mask.family());
        let covered: Vec<NodeId> = tree
            .iter()
            .filter(|(_, p, _)| mask.covers(p))
            .map(|(id, _, _)| id)
            .collect();
        let removed = covered.len();
        for id in covered {
            tree.remove(id);
        }
        if removed > 0 {
            info!("[REJECT] Removed {} entries under {}", removed, mask);
            self.report_size();
        }
        removed
    }

    /// Drop every entry. Queued disconnects are kept.
    pub fn flush(&mut self) {
        let dropped = self.len();
        self.v4.clear();
        self.v6.clear();
        warn!("[REJECT] Flushed {} cached entries", dropped);
        self.report_size();
    }

    pub fn get(&self, ip: IpAddr) -> Option<RejectEntry> {
        let prefix = Prefix::from_ip(ip);
        let tree = self.tree(prefix.family());
        tree.search_exact(&prefix).and_then(|id| tree.get(id)).copied()
    }

    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Snapshot of every entry, IPv4 first, for debug listings.
    pub fn entries(&self) -> Vec<(Prefix, RejectEntry)> {
        let mut out = Vec::with_capacity(self.len());
        for tree in [&self.v4, &self.v6] {
            tree.for_each(|_, prefix, entry| {
                if let Some(e) = entry {
                    out.push((*prefix, *e));
                }
            });
        }
        out
    }

    /// Node counts (glue included) of the IPv4 and IPv6 trees.
    pub fn active_nodes(&self) -> (usize, usize) {
        (self.v4.active_nodes(), self.v6.active_nodes())
    }
}

impl<H, C> std::fmt::Debug for RejectCache<H, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RejectCache")
            .field("v4", &self.v4)
            .field("v6", &self.v6)
            .field("pending", &self.pending.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Register the expiry sweep and the deferred-disconnect flush with the
/// host scheduler. Called once at startup.
pub fn register<H, C, S, D>(cache: &Rc<RefCell<RejectCache<H, C>>>, scheduler: &mut S, disconnect: D)
where
    H: 'static,
    C: Clock + 'static,
    S: Scheduler + ?Sized,
    D: Disconnect<H> + 'static,
{
    let (sweep_every, flush_every) = {
        let c = cache.borrow();
        (c.config.sweep_interval, c.config.flush_interval)
    };

    let sweeper = Rc::clone(cache);
    scheduler.schedule_periodic(
        SWEEP_TASK_NAME,
        sweep_every,
        Box::new(move || match sweeper.try_borrow_mut() {
            Ok(mut c) => {
                c.sweep();
            }
            Err(_) => warn!("[SWEEP] Cache busy, skipping this tick"),
        }),
    );

    let flusher = Rc::clone(cache);
    let mut disconnect = disconnect;
    scheduler.schedule_periodic(
        FLUSH_TASK_NAME,
        flush_every,
        Box::new(move || match flusher.try_borrow_mut() {
            Ok(mut c) => {
                c.flush_pending(&mut disconnect);
            }
            Err(_) => warn!("[EXIT] Cache busy, skipping this tick"),
        }),
    );
    info!(
        "[REJECT] Scheduled {} every {:?} and {} every {:?}",
        SWEEP_TASK_NAME, sweep_every, FLUSH_TASK_NAME, flush_every
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ManualClock;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn cache(ban: u64) -> (RejectCache<u32, ManualClock>, ManualClock) {
        let clock = ManualClock::new(1_000);
        let config = RejectConfig {
            reject_ban_time: ban,
            ..Default::default()
        };
        (RejectCache::with_clock(config, clock.clone()).unwrap(), clock)
    }

    #[test]
    fn add_then_check_hits() {
        let (mut c, _) = cache(60);
        c.add(ip("1.2.3.4")).unwrap();
        assert!(c.check(ip("1.2.3.4"), 7));
        assert_eq!(c.pending_len(), 1);
        assert!(!c.check(ip("5.6.7.8"), 8));
        assert_eq!(c.pending_len(), 1);
    }

    #[test]
    fn first_offence_writes_payload() {
        let (mut c, _) = cache(60);
        // a re-added address starts over
        c.add(ip("10.0.0.1")).unwrap();
        c.add(ip("10.0.0.2")).unwrap();
        c.remove_ip(ip("10.0.0.1"));
        c.add(ip("10.0.0.1")).unwrap();
        for a in ["10.0.0.1", "10.0.0.2"] {
            assert_eq!(
                c.get(ip(a)),
                Some(RejectEntry {
                    last_seen: 1_000,
                    count: 1
                })
            );
        }
    }

    #[test]
    fn repeated_offences_refresh_and_count() {
        let (mut c, clock) = cache(60);
        c.add(ip("1.2.3.4")).unwrap();
        clock.advance(10);
        c.add(ip("1.2.3.4")).unwrap();
        assert_eq!(
            c.get(ip("1.2.3.4")),
            Some(RejectEntry {
                last_seen: 1_010,
                count: 2
            })
        );
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn check_refreshes_timestamp() {
        let (mut c, clock) = cache(60);
        c.add(ip("1.2.3.4")).unwrap();
        clock.advance(50);
        assert!(c.check(ip("1.2.3.4"), 1));
        clock.advance(50);
        assert_eq!(c.sweep(), 0);
        clock.advance(11);
        assert_eq!(c.sweep(), 1);
        assert!(c.is_empty());
    }

    #[test]
    fn threshold_holds_back_first_offences() {
        let clock = ManualClock::new(0);
        let config = RejectConfig {
            reject_after_count: 3,
            ..Default::default()
        };
        let mut c: RejectCache<u32, _> = RejectCache::with_clock(config, clock).unwrap();
        for _ in 0..2 {
            c.add(ip("9.9.9.9")).unwrap();
        }
        assert!(!c.check(ip("9.9.9.9"), 1));
        c.add(ip("9.9.9.9")).unwrap();
        assert!(c.check(ip("9.9.9.9"), 1));
    }

    #[test]
    fn disabled_cache_is_inert() {
        let (mut c, _) = cache(0);
        c.add(ip("1.2.3.4")).unwrap();
        assert!(c.is_empty());
        assert!(!c.check(ip("1.2.3.4"), 1));
    }

    #[test]
    fn flush_pending_is_fifo() {
        let (mut c, _) = cache(60);
        c.add(ip("10.0.0.1")).unwrap();
        c.add(ip("2001:db8::1")).unwrap();
        assert!(c.check(ip("10.0.0.1"), 1));
        assert!(c.check(ip("2001:db8::1"), 2));
        assert!(c.check(ip("10.0.0.1"), 3));
        let mut closed = Vec::new();
        let n = c.flush_pending(&mut |h: u32, reason: &str| {
            assert_eq!(reason, REJECT_EXIT_REASON);
            closed.push(h)
        });
        assert_eq!(n, 3);
        assert_eq!(closed, vec![1, 2, 3]);
        assert_eq!(c.pending_len(), 0);
    }

    #[test]
    fn mapped_v6_hits_the_v4_entry() {
        let (mut c, _) = cache(60);
        c.add(ip("::ffff:192.0.2.7")).unwrap();
        assert!(c.check(ip("192.0.2.7"), 1));
        assert_eq!(c.active_nodes(), (1, 0));
    }

    #[test]
    fn removal_by_ip_and_mask() {
        let (mut c, _) = cache(60);
        for a in ["10.0.0.1", "10.0.0.2", "10.0.1.1", "192.168.1.1", "2001:db8::5"] {
            c.add(ip(a)).unwrap();
        }
        assert!(c.remove_ip(ip("192.168.1.1")));
        assert!(!c.remove_ip(ip("192.168.1.1")));
        let mask = Prefix::from_text(None, "10.0.0.0/24").unwrap();
        assert_eq!(c.remove_mask(&mask), 2);
        let left: Vec<String> = c.entries().iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(left, ["10.0.1.1/32", "2001:db8::5/128"]);
        c.flush();
        assert!(c.is_empty());
        assert_eq!(c.active_nodes(), (0, 0));
    }
}
