//! Small set-associative buffer of pending remap notifications used by the
//! Banshee scheme. LRU is tracked only over non-remap entries; remap-marked
//! entries are pinned until the buffer is cleared wholesale.

use crate::mem::error::FatalError;
use crate::mem::request::Cycle;

#[derive(Debug, Clone, Copy)]
struct TagBufferEntry {
    tag: u64,
    valid: bool,
    remap: bool,
    lru: u32,
}

#[derive(Debug)]
pub struct TagBuffer {
    entries: Vec<TagBufferEntry>,
    num_sets: u32,
    num_ways: u32,
    entry_occupied: u32,
    last_clear_cycle: Cycle,
}

impl TagBuffer {
    pub fn new(size: u32) -> Self {
        let num_ways = 8;
        let num_sets = (size / num_ways).max(1);
        let mut entries = Vec::with_capacity((num_sets * num_ways) as usize);
        for _ in 0..num_sets {
            for way in 0..num_ways {
                entries.push(TagBufferEntry {
                    tag: 0,
                    valid: false,
                    remap: false,
                    lru: way,
                });
            }
        }
        Self {
            entries,
            num_sets,
            num_ways,
            entry_occupied: 0,
            last_clear_cycle: 0,
        }
    }

    pub fn num_ways(&self) -> u32 {
        self.num_ways
    }

    fn set_of(&self, tag: u64) -> u32 {
        (tag % self.num_sets as u64) as u32
    }

    fn idx(&self, set: u32, way: u32) -> usize {
        (set * self.num_ways + way) as usize
    }

    /// Way holding `tag`, or None on a miss.
    pub fn lookup(&self, tag: u64) -> Option<u32> {
        let set = self.set_of(tag);
        (0..self.num_ways).find(|&way| {
            let entry = &self.entries[self.idx(set, way)];
            entry.valid && entry.tag == tag
        })
    }

    pub fn can_insert(&self, tag: u64) -> bool {
        self.debug_check_occupancy();
        let set = self.set_of(tag);
        (0..self.num_ways).any(|way| {
            let entry = &self.entries[self.idx(set, way)];
            !entry.remap || (entry.valid && entry.tag == tag)
        })
    }

    pub fn can_insert_pair(&self, tag1: u64, tag2: u64) -> bool {
        let (set1, set2) = (self.set_of(tag1), self.set_of(tag2));
        if set1 != set2 {
            return self.can_insert(tag1) && self.can_insert(tag2);
        }
        let usable = (0..self.num_ways)
            .filter(|&way| {
                let entry = &self.entries[self.idx(set1, way)];
                !entry.remap || (entry.valid && (entry.tag == tag1 || entry.tag == tag2))
            })
            .count();
        usable >= 2
    }

    /// Inserts `tag`, evicting the highest-LRU non-remap way when the tag
    /// is new. Fails when every way of the target set is remap-pinned.
    pub fn insert(&mut self, tag: u64, remap: bool) -> Result<(), FatalError> {
        let set = self.set_of(tag);
        if let Some(way) = self.lookup(tag) {
            let idx = self.idx(set, way);
            if remap {
                if !self.entries[idx].remap {
                    self.entry_occupied += 1;
                }
                self.entries[idx].remap = true;
            } else if !self.entries[idx].remap {
                self.update_lru(set, way);
            }
            return Ok(());
        }

        let mut max_lru = 0;
        let mut replace_way = None;
        for way in 0..self.num_ways {
            let entry = &self.entries[self.idx(set, way)];
            if !entry.remap && entry.lru >= max_lru {
                max_lru = entry.lru;
                replace_way = Some(way);
            }
        }
        let way = replace_way.ok_or_else(|| {
            FatalError::invariant(format!("tag buffer set {set} fully remap-pinned"))
        })?;
        let idx = self.idx(set, way);
        self.entries[idx].tag = tag;
        self.entries[idx].valid = true;
        self.entries[idx].remap = remap;
        if remap {
            self.entry_occupied += 1;
        } else {
            self.update_lru(set, way);
        }
        Ok(())
    }

    fn update_lru(&mut self, set: u32, way: u32) {
        debug_assert!(!self.entries[self.idx(set, way)].remap);
        let target_lru = self.entries[self.idx(set, way)].lru;
        for other in 0..self.num_ways {
            let idx = self.idx(set, other);
            if !self.entries[idx].remap && self.entries[idx].lru < target_lru {
                self.entries[idx].lru += 1;
            }
        }
        let idx = self.idx(set, way);
        self.entries[idx].lru = 0;
    }

    pub fn clear(&mut self, now: Cycle) {
        self.entry_occupied = 0;
        self.last_clear_cycle = now;
        for set in 0..self.num_sets {
            for way in 0..self.num_ways {
                let idx = self.idx(set, way);
                self.entries[idx] = TagBufferEntry {
                    tag: 0,
                    valid: false,
                    remap: false,
                    lru: way,
                };
            }
        }
    }

    pub fn occupancy(&self) -> f64 {
        self.entry_occupied as f64 / (self.num_ways as f64 * self.num_sets as f64)
    }

    pub fn entry_occupied(&self) -> u32 {
        self.entry_occupied
    }

    pub fn last_clear_cycle(&self) -> Cycle {
        self.last_clear_cycle
    }

    fn debug_check_occupancy(&self) {
        debug_assert_eq!(
            self.entries.iter().filter(|e| e.remap).count(),
            self.entry_occupied as usize,
            "entry_occupied out of sync with remap flags"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remap_inserts_raise_occupancy() {
        let mut tb = TagBuffer::new(16); // 2 sets x 8 ways
        tb.insert(2, true).unwrap();
        tb.insert(4, true).unwrap();
        assert_eq!(tb.entry_occupied(), 2);
        // Re-marking the same tag does not double count.
        tb.insert(2, true).unwrap();
        assert_eq!(tb.entry_occupied(), 2);
    }

    #[test]
    fn non_remap_inserts_only_touch_lru() {
        let mut tb = TagBuffer::new(16);
        tb.insert(2, false).unwrap();
        tb.insert(4, false).unwrap();
        assert_eq!(tb.entry_occupied(), 0);
        assert!(tb.lookup(2).is_some());
    }

    #[test]
    fn full_remap_set_rejects_insert() {
        let mut tb = TagBuffer::new(8); // 1 set x 8 ways
        for tag in 0..8u64 {
            assert!(tb.can_insert(tag));
            tb.insert(tag, true).unwrap();
        }
        assert!(!tb.can_insert(100));
        assert!(tb.insert(100, true).is_err());
        assert!((tb.occupancy() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn pair_insert_needs_two_free_ways_in_shared_set() {
        let mut tb = TagBuffer::new(8);
        for tag in 0..7u64 {
            tb.insert(tag, true).unwrap();
        }
        // One non-remap way left: a pair of fresh tags does not fit.
        assert!(tb.can_insert(100));
        assert!(!tb.can_insert_pair(100, 108));
        // But an existing remap tag plus one fresh tag does.
        assert!(tb.can_insert_pair(3, 100));
    }

    #[test]
    fn clear_resets_state_and_records_time() {
        let mut tb = TagBuffer::new(16);
        for tag in 0..10u64 {
            tb.insert(tag, true).unwrap();
        }
        tb.clear(777);
        assert_eq!(tb.entry_occupied(), 0);
        assert_eq!(tb.last_clear_cycle(), 777);
        assert_eq!(tb.lookup(3), None);
        assert!(tb.can_insert(3));
    }

    #[test]
    fn occupancy_matches_remap_count() {
        let mut tb = TagBuffer::new(16);
        tb.insert(1, true).unwrap();
        tb.insert(2, false).unwrap();
        tb.insert(3, true).unwrap();
        assert_eq!(tb.entry_occupied(), 2);
        assert!((tb.occupancy() - 2.0 / 16.0).abs() < 1e-9);
    }
}
