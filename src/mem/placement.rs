//! Replacement policies. Line placement is trivial (slot 0); page
//! placement offers an LRU and a frequency-based (FBR) variant. Policies
//! report whether they touched a counter structure so the caller can
//! charge the in-DRAM counter traffic.

use std::collections::HashMap;

use crate::mem::error::FatalError;
use crate::mem::request::ReqType;
use crate::mem::tag_array::TagArray;

/// Direct-mapped line schemes always refill slot 0.
#[derive(Debug, Default)]
pub struct LinePlacement;

impl LinePlacement {
    pub fn on_miss(&mut self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagePolicyKind {
    Lru,
    Fbr,
}

impl PagePolicyKind {
    pub fn parse(name: &str) -> Result<Self, FatalError> {
        match name {
            "LRU" => Ok(Self::Lru),
            "FBR" => Ok(Self::Fbr),
            other => Err(FatalError::config(format!(
                "unknown placement policy {other}"
            ))),
        }
    }
}

const FBR_DECAY_PERIOD: u64 = 10_000;

#[derive(Debug)]
pub struct PagePlacement {
    kind: PagePolicyKind,
    num_ways: u64,
    /// Per-way recency stamp (LRU) or frequency counter (FBR).
    stamps: Vec<u64>,
    /// Candidate-page frequencies seen at miss time (FBR only).
    miss_freq: HashMap<u64, u64>,
    tick: u64,
}

impl PagePlacement {
    pub fn new(kind: PagePolicyKind, num_sets: u64, num_ways: u64) -> Self {
        Self {
            kind,
            num_ways,
            stamps: vec![0; (num_sets * num_ways) as usize],
            miss_freq: HashMap::new(),
            tick: 0,
        }
    }

    fn stamp_idx(&self, set: u64, way: u64) -> usize {
        (set * self.num_ways + way) as usize
    }

    pub fn on_hit(
        &mut self,
        _tag: u64,
        _rtype: ReqType,
        set: u64,
        hit_way: u64,
        counter_access: &mut bool,
    ) {
        let idx = self.stamp_idx(set, hit_way);
        match self.kind {
            PagePolicyKind::Lru => {
                self.tick += 1;
                self.stamps[idx] = self.tick;
            }
            PagePolicyKind::Fbr => {
                self.stamps[idx] = self.stamps[idx].saturating_add(1);
                *counter_access = true;
            }
        }
    }

    /// Chooses the replacement way, or `num_ways` when the policy refuses
    /// to place the page.
    pub fn on_miss(
        &mut self,
        tag: u64,
        _rtype: ReqType,
        set: u64,
        tags: &TagArray,
        counter_access: &mut bool,
    ) -> u64 {
        if let Some(way) = tags.empty_way(set) {
            self.note_placement(set, way);
            return way;
        }
        let victim = (0..self.num_ways)
            .min_by_key(|&w| self.stamps[self.stamp_idx(set, w)])
            .unwrap_or(0);
        match self.kind {
            PagePolicyKind::Lru => {
                self.note_placement(set, victim);
                victim
            }
            PagePolicyKind::Fbr => {
                *counter_access = true;
                self.tick += 1;
                if self.tick % FBR_DECAY_PERIOD == 0 {
                    for stamp in &mut self.stamps {
                        *stamp >>= 1;
                    }
                    self.miss_freq.values_mut().for_each(|f| *f >>= 1);
                }
                let victim_stamp = self.stamps[self.stamp_idx(set, victim)];
                let freq = self.miss_freq.entry(tag).or_insert(0);
                *freq += 1;
                // Place only once the candidate is at least as hot as the
                // coldest resident page.
                if *freq >= victim_stamp {
                    self.note_placement(set, victim);
                    victim
                } else {
                    self.num_ways
                }
            }
        }
    }

    fn note_placement(&mut self, set: u64, way: u64) {
        let idx = self.stamp_idx(set, way);
        match self.kind {
            PagePolicyKind::Lru => {
                self.tick += 1;
                self.stamps[idx] = self.tick;
            }
            PagePolicyKind::Fbr => {
                self.stamps[idx] = 1;
            }
        }
    }

    /// Forgets the recency/frequency state of one set. Used when the
    /// rebalancer bulk-evicts a set range.
    pub fn flush_chunk(&mut self, set: u64) {
        for way in 0..self.num_ways {
            let idx = self.stamp_idx(set, way);
            self.stamps[idx] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_tags(num_sets: u64, num_ways: u64) -> TagArray {
        let mut tags = TagArray::new(num_sets, num_ways);
        for set in 0..num_sets {
            for way in 0..num_ways {
                tags.install(set, way, 100 + set * num_ways + way, false);
            }
        }
        tags
    }

    #[test]
    fn line_placement_always_places() {
        assert!(LinePlacement.on_miss());
    }

    #[test]
    fn lru_prefers_empty_then_coldest() {
        let mut tags = TagArray::new(1, 2);
        let mut policy = PagePlacement::new(PagePolicyKind::Lru, 1, 2);
        let mut counter = false;
        assert_eq!(
            policy.on_miss(1, ReqType::Load, 0, &tags, &mut counter),
            0
        );
        tags.install(0, 0, 1, false);
        assert_eq!(
            policy.on_miss(2, ReqType::Load, 0, &tags, &mut counter),
            1
        );
        tags.install(0, 1, 2, false);
        // Touch way 1: way 0 becomes the LRU victim.
        policy.on_hit(2, ReqType::Load, 0, 1, &mut counter);
        assert_eq!(
            policy.on_miss(3, ReqType::Load, 0, &tags, &mut counter),
            0
        );
        assert!(!counter, "LRU does not touch a counter structure");
    }

    #[test]
    fn fbr_defers_cold_candidates() {
        let tags = filled_tags(1, 2);
        let mut policy = PagePlacement::new(PagePolicyKind::Fbr, 1, 2);
        let mut counter = false;
        // Warm up the resident pages.
        policy.on_hit(100, ReqType::Load, 0, 0, &mut counter);
        policy.on_hit(100, ReqType::Load, 0, 0, &mut counter);
        policy.on_hit(101, ReqType::Load, 0, 1, &mut counter);
        policy.on_hit(101, ReqType::Load, 0, 1, &mut counter);
        // First miss of a cold page is refused, repeated misses promote it.
        let first = policy.on_miss(7, ReqType::Load, 0, &tags, &mut counter);
        assert_eq!(first, 2, "cold candidate must not replace a warm page");
        policy.on_miss(7, ReqType::Load, 0, &tags, &mut counter);
        let promoted = policy.on_miss(7, ReqType::Load, 0, &tags, &mut counter);
        assert!(promoted < 2);
        assert!(counter, "FBR reports counter traffic");
    }

    #[test]
    fn flush_chunk_resets_recency() {
        let tags = filled_tags(2, 2);
        let mut policy = PagePlacement::new(PagePolicyKind::Lru, 2, 2);
        let mut counter = false;
        policy.on_hit(100, ReqType::Load, 0, 0, &mut counter);
        policy.on_hit(101, ReqType::Load, 0, 1, &mut counter);
        policy.flush_chunk(0);
        // After the flush both ways look equally cold; way 0 wins the tie.
        assert_eq!(
            policy.on_miss(9, ReqType::Load, 0, &tags, &mut counter),
            0
        );
    }
}
