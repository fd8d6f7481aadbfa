/// One slot of a set: the resident tag and its state bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct Way {
    pub tag: u64,
    pub valid: bool,
    pub dirty: bool,
}

/// `num_sets x num_ways` ways in one flat allocation. The controller
/// serialises all access; there is no interior locking.
#[derive(Debug)]
pub struct TagArray {
    num_sets: u64,
    num_ways: u64,
    ways: Vec<Way>,
}

impl TagArray {
    pub fn new(num_sets: u64, num_ways: u64) -> Self {
        let num_sets = num_sets.max(1);
        let num_ways = num_ways.max(1);
        Self {
            num_sets,
            num_ways,
            ways: vec![Way::default(); (num_sets * num_ways) as usize],
        }
    }

    pub fn num_sets(&self) -> u64 {
        self.num_sets
    }

    pub fn num_ways(&self) -> u64 {
        self.num_ways
    }

    fn idx(&self, set: u64, way: u64) -> usize {
        debug_assert!(set < self.num_sets && way < self.num_ways);
        (set * self.num_ways + way) as usize
    }

    pub fn way(&self, set: u64, way: u64) -> &Way {
        &self.ways[self.idx(set, way)]
    }

    pub fn way_mut(&mut self, set: u64, way: u64) -> &mut Way {
        let idx = self.idx(set, way);
        &mut self.ways[idx]
    }

    /// Index of the valid way holding `tag`, if any.
    pub fn find(&self, set: u64, tag: u64) -> Option<u64> {
        (0..self.num_ways).find(|&w| {
            let way = self.way(set, w);
            way.valid && way.tag == tag
        })
    }

    pub fn empty_way(&self, set: u64) -> Option<u64> {
        (0..self.num_ways).find(|&w| !self.way(set, w).valid)
    }

    pub fn install(&mut self, set: u64, way: u64, tag: u64, dirty: bool) {
        debug_assert!(
            self.find(set, tag).map_or(true, |w| w == way),
            "duplicate tag {tag:#x} in set {set}"
        );
        let slot = self.way_mut(set, way);
        slot.tag = tag;
        slot.valid = true;
        slot.dirty = dirty;
    }

    pub fn evict(&mut self, set: u64, way: u64) {
        let slot = self.way_mut(set, way);
        slot.valid = false;
        slot.dirty = false;
    }

    /// Bulk reset of `[first_set, last_set)`, used by the rebalancer after
    /// it has written back the dirty contents.
    pub fn flush_range(&mut self, first_set: u64, last_set: u64) {
        let last_set = last_set.min(self.num_sets);
        for set in first_set..last_set {
            for way in 0..self.num_ways {
                self.evict(set, way);
            }
        }
    }

    /// No two valid ways of one set may share a tag.
    pub fn set_is_consistent(&self, set: u64) -> bool {
        for a in 0..self.num_ways {
            for b in (a + 1)..self.num_ways {
                let (wa, wb) = (self.way(set, a), self.way(set, b));
                if wa.valid && wb.valid && wa.tag == wb.tag {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_and_install() {
        let mut tags = TagArray::new(4, 2);
        assert_eq!(tags.find(0, 7), None);
        tags.install(0, 0, 7, false);
        assert_eq!(tags.find(0, 7), Some(0));
        tags.install(0, 1, 9, true);
        assert_eq!(tags.find(0, 9), Some(1));
        assert!(tags.way(0, 1).dirty);
        assert!(tags.set_is_consistent(0));
    }

    #[test]
    fn evict_clears_state() {
        let mut tags = TagArray::new(2, 1);
        tags.install(1, 0, 3, true);
        tags.evict(1, 0);
        let way = tags.way(1, 0);
        assert!(!way.valid && !way.dirty);
        assert_eq!(tags.empty_way(1), Some(0));
    }

    #[test]
    fn flush_range_is_bounded() {
        let mut tags = TagArray::new(4, 1);
        for set in 0..4 {
            tags.install(set, 0, set + 10, false);
        }
        tags.flush_range(1, 100);
        assert!(tags.way(0, 0).valid);
        for set in 1..4 {
            assert!(!tags.way(set, 0).valid);
        }
    }

    #[test]
    fn zero_geometry_normalises_to_one() {
        let tags = TagArray::new(0, 0);
        assert_eq!(tags.num_sets(), 1);
        assert_eq!(tags.num_ways(), 1);
    }
}
