//! Single-set fully-associative oracles. IdealBalanced rotates a victim
//! pointer, IdealFully and IdealAssociative run a true LRU over a
//! doubly-linked ring of ways. A perfect inverted index maps every
//! external line to its resident way.

use crate::mem::device::{ChainMode, DramPool};
use crate::mem::error::FatalError;
use crate::mem::request::{AccessKind, Cycle, MemRequest, ReqType};
use crate::mem::scheme::{balance_bandwidth, CacheScheme, SchemeConfig, SchemeCore, SchemeKind};
use crate::mem::stats::UtilStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdealPolicy {
    RoundRobin,
    Lru,
}

/// O(1) LRU over the ways: `prev`/`next` form one circular ring with
/// explicit MRU and LRU cursors.
#[derive(Debug)]
pub(crate) struct LruRing {
    prev: Vec<u64>,
    next: Vec<u64>,
    mru: u64,
    lru: u64,
}

impl LruRing {
    pub(crate) fn new(num_ways: u64) -> Self {
        let n = num_ways.max(1);
        let next = (0..n).map(|i| (i + 1) % n).collect();
        let prev = (0..n).map(|i| (i + n - 1) % n).collect();
        Self {
            prev,
            next,
            mru: 0,
            lru: n - 1,
        }
    }

    /// Moves `way` to the MRU position.
    pub(crate) fn touch(&mut self, way: u64) {
        if way == self.mru {
            return;
        }
        let (w, mru) = (way as usize, self.mru as usize);
        let prev = self.prev[w];
        let next = self.next[w];
        self.next[prev as usize] = next;
        self.prev[next as usize] = prev;
        if way == self.lru {
            self.lru = prev;
        }
        let old_prev_of_mru = self.prev[mru];
        self.next[w] = self.mru;
        self.prev[w] = old_prev_of_mru;
        self.prev[mru] = way;
        self.next[old_prev_of_mru as usize] = way;
        self.mru = way;
    }

    pub(crate) fn lru_way(&self) -> u64 {
        self.lru
    }

    pub(crate) fn mru_way(&self) -> u64 {
        self.mru
    }

    /// Ways in MRU-to-LRU order; traversal must visit each exactly once.
    pub(crate) fn order(&self) -> Vec<u64> {
        let mut order = Vec::with_capacity(self.next.len());
        let mut cursor = self.mru;
        for _ in 0..self.next.len() {
            order.push(cursor);
            cursor = self.next[cursor as usize];
        }
        order
    }
}

#[derive(Debug)]
enum VictimState {
    RoundRobin { current_way: u64 },
    Lru(LruRing),
}

#[derive(Debug)]
pub struct IdealCache {
    core: SchemeCore,
    kind: SchemeKind,
    victims: VictimState,
    /// External line -> resident way, `num_ways` when absent. Entries go
    /// stale on eviction; the tag check filters them.
    line_entries: Vec<u64>,
    util: UtilStats,
}

impl IdealCache {
    pub fn new(cfg: SchemeConfig, kind: SchemeKind) -> Result<Self, FatalError> {
        let policy = match kind {
            SchemeKind::IdealBalanced => IdealPolicy::RoundRobin,
            SchemeKind::IdealAssociative | SchemeKind::IdealFully => IdealPolicy::Lru,
            other => {
                return Err(FatalError::config(format!(
                    "{} is not an ideal-oracle scheme",
                    other.name()
                )))
            }
        };
        if cfg.num_sets != 1 {
            return Err(FatalError::config(format!(
                "ideal oracles are single-set, got {} sets",
                cfg.num_sets
            )));
        }
        if cfg.granularity != 64 {
            return Err(FatalError::config(format!(
                "ideal oracles are line-granular, got granularity {}",
                cfg.granularity
            )));
        }
        if cfg.ext_size == 0 {
            return Err(FatalError::config(
                "ideal oracles need a bounded external size".to_string(),
            ));
        }
        let num_line_entries = cfg.ext_size / 64;
        let victims = match policy {
            IdealPolicy::RoundRobin => VictimState::RoundRobin { current_way: 0 },
            IdealPolicy::Lru => VictimState::Lru(LruRing::new(cfg.num_ways)),
        };
        let util = UtilStats::new(
            cfg.cache_size / 64,
            num_line_entries,
            cfg.ext_size / cfg.page_size.max(1),
        );
        let line_entries = vec![cfg.num_ways; num_line_entries as usize];
        Ok(Self {
            core: SchemeCore::new(cfg),
            kind,
            victims,
            line_entries,
            util,
        })
    }

    #[cfg(test)]
    pub(crate) fn lru_ring(&self) -> Option<&LruRing> {
        match &self.victims {
            VictimState::Lru(ring) => Some(ring),
            VictimState::RoundRobin { .. } => None,
        }
    }

    fn pick_victim(&mut self, line_num: usize) -> u64 {
        let num_ways = self.core.cfg.num_ways;
        match &mut self.victims {
            VictimState::RoundRobin { current_way } => {
                let stale = self.line_entries[line_num];
                if stale < num_ways {
                    stale
                } else {
                    let way = *current_way;
                    *current_way = (*current_way + 1) % num_ways;
                    way
                }
            }
            VictimState::Lru(ring) => ring.lru_way(),
        }
    }

    fn touch(&mut self, way: u64) {
        if let VictimState::Lru(ring) = &mut self.victims {
            ring.touch(way);
        }
    }
}

impl CacheScheme for IdealCache {
    fn access(&mut self, req: &mut MemRequest, mem: &mut DramPool) -> Result<Cycle, FatalError> {
        let rtype = req.req_type();
        let num_ways = self.core.cfg.num_ways;
        let ext_lines = self.core.cfg.ext_size / 64;
        let address = req.line_addr % ext_lines;
        let tag = address;
        let line_num = address as usize;
        let lines_per_page = self.core.cfg.page_size / 64;
        self.util.record_ext(address, lines_per_page);

        let mut hit_way = num_ways;
        let mapped = self.line_entries[line_num];
        if mapped < num_ways {
            let way = self.core.tags.way(0, mapped);
            if way.valid && way.tag == tag {
                hit_way = mapped;
            }
        }

        // Model the hit on the (possibly just filled) resident line.
        let kind = match rtype {
            ReqType::Load => AccessKind::Gets,
            ReqType::Store => AccessKind::Putx,
        };
        let mc_req = MemRequest::new(address, kind, req.cycle);
        req.cycle = mem.mcdram[0].access(&mc_req, ChainMode::Fresh, 4);
        self.core.window.mc_bw += 4;

        let data_ready_cycle;
        if hit_way < num_ways {
            self.core.record_hit();
            if rtype == ReqType::Store {
                self.core.tags.way_mut(0, hit_way).dirty = true;
                self.core.stats.store_hit += 1;
            } else {
                self.core.stats.load_hit += 1;
            }
            self.util.record_line(hit_way);
            data_ready_cycle = req.cycle;
            self.touch(hit_way);
        } else {
            self.core.record_miss();
            match rtype {
                ReqType::Load => self.core.stats.load_miss += 1,
                ReqType::Store => self.core.stats.store_miss += 1,
            }

            if rtype == ReqType::Load {
                let fetch = MemRequest::new(address, AccessKind::Gets, req.cycle);
                data_ready_cycle = mem.ext.access(&fetch, ChainMode::Chained, 4);
                self.core.window.ext_bw += 4;
            } else {
                data_ready_cycle = req.cycle;
            }

            let victim_way = self.pick_victim(line_num);
            self.line_entries[line_num] = victim_way;

            let victim = *self.core.tags.way(0, victim_way);
            if victim.valid {
                if victim.dirty {
                    self.core.stats.dirty_evict += 1;
                    let wb_req = MemRequest::new(victim.tag * 64, AccessKind::Putx, req.cycle);
                    mem.ext.access(&wb_req, ChainMode::Sibling, 4);
                    self.core.window.ext_bw += 4;
                } else {
                    self.core.stats.clean_evict += 1;
                }
                self.core.tags.evict(0, victim_way);
            }
            self.core
                .tags
                .install(0, victim_way, tag, rtype == ReqType::Store);
            self.util.record_line(victim_way);
            self.touch(victim_way);
        }

        Ok(data_ready_cycle)
    }

    fn period(&mut self, req: &mut MemRequest, mem: &mut DramPool) -> Result<(), FatalError> {
        balance_bandwidth(&mut self.core, mem, req, |_, _, _, _| Ok(()))
    }

    fn kind(&self) -> SchemeKind {
        self.kind
    }

    fn core(&self) -> &SchemeCore {
        &self.core
    }

    fn util_stats(&self) -> Option<&UtilStats> {
        Some(&self.util)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_traversal_visits_every_way_once() {
        let mut ring = LruRing::new(4);
        ring.touch(2);
        ring.touch(0);
        let order = ring.order();
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3]);
        assert_eq!(order[0], ring.mru_way());
    }

    #[test]
    fn ring_tracks_mru_and_lru() {
        let mut ring = LruRing::new(3);
        // Touch in order 0, 1, 2: way 0 becomes LRU.
        ring.touch(0);
        ring.touch(1);
        ring.touch(2);
        assert_eq!(ring.mru_way(), 2);
        assert_eq!(ring.lru_way(), 0);
        ring.touch(0);
        assert_eq!(ring.mru_way(), 0);
        assert_eq!(ring.lru_way(), 1);
    }

    #[test]
    fn single_way_ring_is_stable() {
        let mut ring = LruRing::new(1);
        ring.touch(0);
        assert_eq!(ring.mru_way(), 0);
        assert_eq!(ring.lru_way(), 0);
        assert_eq!(ring.order(), vec![0]);
    }
}
