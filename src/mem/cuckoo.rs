//! Cuckoo-indexed set mapping for the CHAMO scheme.
//!
//! Incoming physical cache addresses are shuffled into a CXL-side line
//! space, split into `(level, column)` coordinates, and resolved to a
//! DRAM-cache column through one of three hash indices: identity,
//! next-line, or an XXHash fallback. Per-column rank bookkeeping
//! (base / overflow / self-contain) decides which index applies, so that
//! displaced entries keep a reachable slot.

use serde::Serialize;

use crate::mem::error::FatalError;
use crate::mem::hash::{xxhash64, LcgHash, NextLineHash};

/// Hash index values recorded per (level, column).
const HASH_IDENTITY: u8 = 0;
const HASH_NEXT_LINE: u8 = 1;
const HASH_FALLBACK: u8 = 2;
const HASH_UNSET: u8 = u8::MAX;

const TARGET_LOAD_RATIO: u64 = 95;
const KICK_WINDOW_LEN: u64 = 4;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CuckooMetrics {
    /// Distinct (level, column) entries ever touched.
    pub touched: u64,
    /// Entries currently resolved through a cuckoo hash index.
    #[serde(rename = "cuckooMapped")]
    pub cuckoo_mapped: u64,
    #[serde(rename = "hashChanges")]
    pub hash_changes: u64,
    #[serde(rename = "kickOuts")]
    pub kick_outs: u64,
    #[serde(rename = "cumKickPathLen")]
    pub cum_kick_path_len: u64,
    #[serde(rename = "periodAccesses")]
    pub period_accesses: u64,
    #[serde(rename = "newlyCached")]
    pub newly_cached: u64,
}

#[derive(Debug)]
pub struct CuckooIndex {
    nr_dram_cache: u64,
    nr_cxl_cache: u64,
    dram_ratio: u64,
    map_limit: u64,
    overflow_rank: Vec<u64>,
    self_contain_rank: Vec<u64>,
    base_rank: Vec<Vec<u64>>,
    access_bit: Vec<Vec<bool>>,
    is_cuckoo: Vec<Vec<bool>>,
    hash_idx: Vec<Vec<u8>>,
    lcg: LcgHash,
    next_line: NextLineHash,
    metrics: CuckooMetrics,
}

impl CuckooIndex {
    /// `cache_lines` is the DRAM-cache capacity in lines, `ext_lines` the
    /// CXL-side span it fronts. The ratio must be a whole multiple.
    pub fn new(cache_lines: u64, ext_lines: u64) -> Result<Self, FatalError> {
        if cache_lines == 0 || ext_lines < cache_lines {
            return Err(FatalError::config(format!(
                "cuckoo index needs ext_lines >= cache_lines, got {ext_lines}/{cache_lines}"
            )));
        }
        if ext_lines % cache_lines != 0 {
            return Err(FatalError::config(format!(
                "ext_lines {ext_lines} not a multiple of cache_lines {cache_lines}"
            )));
        }
        let dram_ratio = ext_lines / cache_lines;
        Ok(Self {
            nr_dram_cache: cache_lines,
            nr_cxl_cache: ext_lines,
            dram_ratio,
            map_limit: 1,
            overflow_rank: vec![0; cache_lines as usize],
            self_contain_rank: vec![0; cache_lines as usize],
            base_rank: vec![vec![0; cache_lines as usize]; dram_ratio as usize],
            access_bit: vec![vec![false; cache_lines as usize]; dram_ratio as usize],
            is_cuckoo: vec![vec![false; cache_lines as usize]; dram_ratio as usize],
            hash_idx: vec![vec![HASH_UNSET; cache_lines as usize]; dram_ratio as usize],
            lcg: LcgHash::new(ext_lines),
            next_line: NextLineHash::new(cache_lines),
            metrics: CuckooMetrics::default(),
        })
    }

    pub fn metrics(&self) -> &CuckooMetrics {
        &self.metrics
    }

    pub fn map_limit(&self) -> u64 {
        self.map_limit
    }

    pub fn dram_ratio(&self) -> u64 {
        self.dram_ratio
    }

    /// Ranks of one column, exposed for invariant checks.
    pub fn column_ranks(&self, col: u64) -> (u64, u64) {
        (
            self.self_contain_rank[col as usize],
            self.overflow_rank[col as usize],
        )
    }

    pub fn touched(&self, level: u64, col: u64) -> bool {
        self.access_bit[level as usize][col as usize]
    }

    /// Resolves a physical cache address to its DRAM-cache column.
    pub fn locate(&mut self, cache_addr: u64) -> Result<u64, FatalError> {
        let line = self.lcg.hash(cache_addr, 0);
        debug_assert!(line < self.nr_cxl_cache);
        self.metrics.period_accesses += 1;

        let level = line / self.nr_dram_cache;
        let col = line % self.nr_dram_cache;

        if !self.access_bit[level as usize][col as usize] {
            self.first_touch(level, col)?;
        }
        self.resolve(level, col)
    }

    fn first_touch(&mut self, level: u64, col: u64) -> Result<(), FatalError> {
        let rank = self.col_capacity(col) + 1;
        if rank == 0 || rank > self.dram_ratio {
            return Err(FatalError::invariant(format!(
                "base rank {rank} out of range for column {col}"
            )));
        }
        self.base_rank[level as usize][col as usize] = rank;
        self.access_bit[level as usize][col as usize] = true;
        self.metrics.touched += 1;
        self.metrics.newly_cached += 1;
        self.update_mapping_info(col, level)
    }

    /// Levels of `col` already touched.
    fn col_capacity(&self, col: u64) -> u64 {
        (0..self.dram_ratio)
            .filter(|&lvl| self.access_bit[lvl as usize][col as usize])
            .count() as u64
    }

    /// Admission of a freshly touched entry: hand its slot debt to the
    /// next column, keep it in its own column, or push the overflow
    /// credit further down a bounded window of columns. An entry that
    /// fits nowhere stays unmapped and resolves through the fallback
    /// hash.
    fn update_mapping_info(&mut self, col: u64, level: u64) -> Result<(), FatalError> {
        debug_assert!(!self.is_cuckoo[level as usize][col as usize]);
        let next = ((col + 1) % self.nr_dram_cache) as usize;
        if self.self_contain_rank[next] + self.overflow_rank[next] < self.map_limit {
            self.overflow_rank[next] += 1;
            self.check_column_budget(next as u64)?;
            self.mark_cuckoo(level, col);
            return Ok(());
        }
        let own = col as usize;
        if self.self_contain_rank[own] + self.overflow_rank[own] < self.map_limit {
            self.self_contain_rank[own] += 1;
            self.check_column_budget(col)?;
            self.mark_cuckoo(level, col);
            return Ok(());
        }
        if let Some(path_len) = self.find_kick_path(col) {
            self.apply_kick_path(col, path_len)?;
            self.mark_cuckoo(level, col);
            return Ok(());
        }
        Ok(())
    }

    /// Window scan for a column that still has rank budget. A column past
    /// twice the map limit ends the scan: the chain of displacements is
    /// not worth pushing through it.
    fn find_kick_path(&self, col: u64) -> Option<u64> {
        for idx in 0..KICK_WINDOW_LEN {
            let c = ((col + idx) % self.nr_dram_cache) as usize;
            let pressure = self.col_capacity(c as u64) + self.overflow_rank[c];
            if pressure >= 2 * self.map_limit {
                break;
            }
            if self.self_contain_rank[c] + self.overflow_rank[c] < self.map_limit {
                return Some(idx);
            }
        }
        None
    }

    /// Entries along the path each relay one slot to the right; only the
    /// terminal column absorbs a new overflow credit.
    fn apply_kick_path(&mut self, col: u64, path_len: u64) -> Result<(), FatalError> {
        let terminal = ((col + path_len) % self.nr_dram_cache) as usize;
        self.overflow_rank[terminal] += 1;
        self.check_column_budget(terminal as u64)?;
        self.metrics.kick_outs += 1;
        self.metrics.cum_kick_path_len += path_len;
        Ok(())
    }

    fn check_column_budget(&self, col: u64) -> Result<(), FatalError> {
        let c = col as usize;
        if self.self_contain_rank[c] + self.overflow_rank[c] > self.map_limit {
            return Err(FatalError::invariant(format!(
                "column {col} rank budget exceeded: self={} overflow={} limit={}",
                self.self_contain_rank[c], self.overflow_rank[c], self.map_limit
            )));
        }
        Ok(())
    }

    fn mark_cuckoo(&mut self, level: u64, col: u64) {
        self.is_cuckoo[level as usize][col as usize] = true;
        self.metrics.cuckoo_mapped += 1;
    }

    /// Monotone within a run: a falling cuckoo count must not retract the
    /// budget earlier admissions were granted under.
    fn update_map_limit(&mut self) {
        let raw = (self.metrics.cuckoo_mapped * 100 / TARGET_LOAD_RATIO)
            .div_ceil(self.nr_dram_cache);
        self.map_limit = raw.clamp(1, self.dram_ratio).max(self.map_limit);
    }

    fn resolve(&mut self, level: u64, col: u64) -> Result<u64, FatalError> {
        self.update_map_limit();

        let base = self.base_rank_of(level, col)?;
        let overflow = self.overflow_rank[col as usize];
        let self_contain = self.self_contain_rank[col as usize];
        if overflow > self.map_limit || self_contain > self.map_limit {
            return Err(FatalError::invariant(format!(
                "column {col} ranks exceed map limit {}: self={self_contain} overflow={overflow}",
                self.map_limit
            )));
        }

        let next = ((col + 1) % self.nr_dram_cache) as usize;
        let target_idx = if base <= self.overflow_rank[next] {
            HASH_NEXT_LINE
        } else if base - self.overflow_rank[next] <= self_contain {
            HASH_IDENTITY
        } else {
            HASH_FALLBACK
        };
        self.hash_to_addr(level, col, target_idx)
    }

    /// 1-indexed rank of this level among the touched levels of `col`.
    fn base_rank_of(&self, level: u64, col: u64) -> Result<u64, FatalError> {
        let mut base = 1u64;
        for lvl in 0..self.dram_ratio {
            if lvl == level {
                if !self.access_bit[lvl as usize][col as usize] {
                    return Err(FatalError::invariant(format!(
                        "rank query for untouched entry ({level},{col})"
                    )));
                }
                if base > self.dram_ratio || self.col_capacity(col) < base {
                    return Err(FatalError::invariant(format!(
                        "base rank {base} inconsistent for column {col}"
                    )));
                }
                return Ok(base);
            }
            if self.access_bit[lvl as usize][col as usize] {
                base += 1;
            }
        }
        Err(FatalError::invariant(format!(
            "level {level} beyond dram ratio {}",
            self.dram_ratio
        )))
    }

    fn hash_to_addr(&mut self, level: u64, col: u64, idx: u8) -> Result<u64, FatalError> {
        let (lvl, c) = (level as usize, col as usize);
        let target = match idx {
            HASH_IDENTITY | HASH_NEXT_LINE => {
                if !self.is_cuckoo[lvl][c] {
                    self.is_cuckoo[lvl][c] = true;
                    self.metrics.cuckoo_mapped += 1;
                }
                self.next_line.hash(col, idx as usize)
            }
            HASH_FALLBACK => {
                if self.is_cuckoo[lvl][c] {
                    self.is_cuckoo[lvl][c] = false;
                    self.metrics.cuckoo_mapped -= 1;
                }
                xxhash64(col + level * self.nr_dram_cache) % self.nr_dram_cache
            }
            _ => unreachable!("hash index is one of the three variants"),
        };
        if self.metrics.cuckoo_mapped > self.metrics.touched {
            return Err(FatalError::invariant(format!(
                "cuckoo count {} exceeds touched count {}",
                self.metrics.cuckoo_mapped, self.metrics.touched
            )));
        }
        if self.hash_idx[lvl][c] != idx {
            self.metrics.hash_changes += 1;
            self.hash_idx[lvl][c] = idx;
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_lookups_are_stable() {
        let mut index = CuckooIndex::new(64, 256).unwrap();
        for addr in 0..64u64 {
            let first = index.locate(addr).unwrap();
            let second = index.locate(addr).unwrap();
            assert_eq!(first, second, "mapping drifted for {addr}");
            assert!(first < 64);
        }
    }

    #[test]
    fn first_touch_records_rank_and_bitmap() {
        let mut index = CuckooIndex::new(16, 64).unwrap();
        index.locate(0).unwrap();
        assert_eq!(index.metrics().touched, 1);
        assert_eq!(index.metrics().newly_cached, 1);
        let touched: Vec<_> = (0..index.dram_ratio())
            .flat_map(|lvl| (0..16).map(move |col| (lvl, col)))
            .filter(|&(lvl, col)| index.touched(lvl, col))
            .collect();
        assert_eq!(touched.len(), 1);
    }

    #[test]
    fn rank_budgets_stay_within_map_limit() {
        let mut index = CuckooIndex::new(32, 256).unwrap();
        for addr in 0..256u64 {
            index.locate(addr).unwrap();
            for col in 0..32u64 {
                let (self_contain, overflow) = index.column_ranks(col);
                assert!(
                    self_contain + overflow <= index.map_limit(),
                    "column {col}: {self_contain}+{overflow} > {}",
                    index.map_limit()
                );
            }
        }
    }

    #[test]
    fn map_limit_adapts_with_load() {
        let mut index = CuckooIndex::new(32, 256).unwrap();
        assert_eq!(index.map_limit(), 1);
        for addr in 0..256u64 {
            index.locate(addr).unwrap();
        }
        assert!(index.map_limit() > 1);
        assert!(index.map_limit() <= index.dram_ratio());
    }

    #[test]
    fn cuckoo_count_never_exceeds_touched() {
        let mut index = CuckooIndex::new(8, 64).unwrap();
        for addr in (0..64u64).chain(0..64) {
            index.locate(addr).unwrap();
            assert!(index.metrics().cuckoo_mapped <= index.metrics().touched);
        }
    }

    #[test]
    fn mismatched_geometry_is_rejected() {
        assert!(matches!(
            CuckooIndex::new(64, 32),
            Err(FatalError::Config(_))
        ));
        assert!(matches!(
            CuckooIndex::new(64, 100),
            Err(FatalError::Config(_))
        ));
    }
}
