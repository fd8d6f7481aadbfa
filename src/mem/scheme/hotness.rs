//! IdealHotness: page-granular oracle that keeps the hottest pages
//! resident. Frequencies saturate upward on hits and decay by one bit on
//! a fixed migration period; the coldest resident page is the victim.

use std::collections::HashMap;

use crate::mem::addr::{line_of_page, page_of_line};
use crate::mem::device::{ChainMode, DramPool};
use crate::mem::error::FatalError;
use crate::mem::request::{AccessKind, Cycle, MemRequest, ReqType};
use crate::mem::scheme::{balance_bandwidth, CacheScheme, SchemeConfig, SchemeCore, SchemeKind};
use crate::mem::stats::UtilStats;

const MIGRATION_PERIOD: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, Default)]
struct PageEntry {
    tag: u64,
    valid: bool,
    dirty: bool,
    frequency: u32,
}

#[derive(Debug)]
pub struct IdealHotness {
    core: SchemeCore,
    page_table: Vec<PageEntry>,
    page_location: HashMap<u64, usize>,
    lines_per_page: u64,
    period_counter: u64,
    util: UtilStats,
}

impl IdealHotness {
    pub fn new(cfg: SchemeConfig) -> Result<Self, FatalError> {
        if cfg.page_size < 64 {
            return Err(FatalError::config(format!(
                "page size {} below one line",
                cfg.page_size
            )));
        }
        let num_pages = (cfg.cache_size / cfg.page_size) as usize;
        if num_pages == 0 {
            return Err(FatalError::config(format!(
                "cache size {} holds no {}-byte page",
                cfg.cache_size, cfg.page_size
            )));
        }
        let lines_per_page = cfg.page_size / 64;
        let util = UtilStats::new(
            cfg.cache_size / 64,
            cfg.ext_size / 64,
            cfg.ext_size / cfg.page_size,
        );
        Ok(Self {
            core: SchemeCore::new(cfg),
            page_table: vec![PageEntry::default(); num_pages],
            page_location: HashMap::new(),
            lines_per_page,
            period_counter: 0,
            util,
        })
    }

    fn find_victim(&self) -> usize {
        if let Some(idx) = self.page_table.iter().position(|p| !p.valid) {
            return idx;
        }
        let mut victim = 0;
        let mut min_freq = u32::MAX;
        for (idx, page) in self.page_table.iter().enumerate() {
            if page.frequency < min_freq {
                min_freq = page.frequency;
                victim = idx;
            }
        }
        victim
    }

    fn decay_frequencies(&mut self) {
        for page in &mut self.page_table {
            page.frequency >>= 1;
        }
    }
}

impl CacheScheme for IdealHotness {
    fn access(&mut self, req: &mut MemRequest, mem: &mut DramPool) -> Result<Cycle, FatalError> {
        let is_write = req.req_type() == ReqType::Store;
        let page_number = page_of_line(req.line_addr, self.lines_per_page);
        self.util.record_ext(req.line_addr, self.lines_per_page);

        let mut data_ready_cycle = req.cycle;
        if let Some(&idx) = self.page_location.get(&page_number) {
            let page = &mut self.page_table[idx];
            page.frequency = page.frequency.saturating_add(1);
            if is_write {
                page.dirty = true;
                self.core.stats.store_hit += 1;
            } else {
                self.core.stats.load_hit += 1;
            }
            self.core.record_hit();
            self.util.record_line(idx as u64);
        } else {
            if is_write {
                self.core.stats.store_miss += 1;
            } else {
                self.core.stats.load_miss += 1;
            }
            self.core.record_miss();

            let victim_idx = self.find_victim();
            let victim = self.page_table[victim_idx];
            if victim.valid {
                if victim.dirty {
                    self.core.stats.dirty_evict += 1;
                    for i in 0..self.lines_per_page {
                        let wb_addr = (line_of_page(victim.tag, self.lines_per_page) + i) * 64;
                        let wb_req = MemRequest::new(wb_addr, AccessKind::Putx, data_ready_cycle);
                        data_ready_cycle = mem.ext.access(&wb_req, ChainMode::Sibling, 4);
                        self.core.window.ext_bw += 4;
                    }
                } else {
                    self.core.stats.clean_evict += 1;
                }
                self.page_location.remove(&victim.tag);
            }

            for i in 0..self.lines_per_page {
                let load_addr = (line_of_page(page_number, self.lines_per_page) + i) * 64;
                let load_req = MemRequest::new(load_addr, AccessKind::Gets, data_ready_cycle);
                data_ready_cycle = mem.ext.access(&load_req, ChainMode::Chained, 4);
                self.core.window.ext_bw += 4;
            }

            self.page_table[victim_idx] = PageEntry {
                tag: page_number,
                valid: true,
                dirty: is_write,
                frequency: 1,
            };
            self.page_location.insert(page_number, victim_idx);
            self.core.stats.placement += 1;
            self.util.record_line(victim_idx as u64);
        }

        self.period_counter += 1;
        if self.period_counter >= MIGRATION_PERIOD {
            self.decay_frequencies();
            self.period_counter = 0;
        }

        Ok(data_ready_cycle)
    }

    fn period(&mut self, req: &mut MemRequest, mem: &mut DramPool) -> Result<(), FatalError> {
        balance_bandwidth(&mut self.core, mem, req, |_, _, _, _| Ok(()))
    }

    fn kind(&self) -> SchemeKind {
        SchemeKind::IdealHotness
    }

    fn core(&self) -> &SchemeCore {
        &self.core
    }

    fn util_stats(&self) -> Option<&UtilStats> {
        Some(&self.util)
    }
}
