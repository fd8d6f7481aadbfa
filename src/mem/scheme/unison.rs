//! Unison: page-granular cache with in-DRAM tags. Every access pays a tag
//! probe; the fill traffic is sized by the predicted footprint, and the
//! per-page touch/dirty bitvectors size the eviction traffic.

use std::collections::HashMap;

use crate::mem::device::{ChainMode, DramPool};
use crate::mem::error::FatalError;
use crate::mem::placement::{PagePlacement, PagePolicyKind};
use crate::mem::request::{AccessKind, Cycle, MemRequest, ReqType};
use crate::mem::scheme::{balance_bandwidth, CacheScheme, SchemeConfig, SchemeCore, SchemeKind};

/// Each bit of the 16-bit vectors covers 4 lines of a 64-line page.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TlbEntry {
    pub way: u64,
    pub touch_bitvec: u16,
    pub dirty_bitvec: u16,
}

impl TlbEntry {
    pub(crate) fn vacant(num_ways: u64) -> Self {
        Self {
            way: num_ways,
            touch_bitvec: 0,
            dirty_bitvec: 0,
        }
    }
}

#[derive(Debug)]
pub struct UnisonCache {
    core: SchemeCore,
    placement: PagePlacement,
    tlb: HashMap<u64, TlbEntry>,
}

impl UnisonCache {
    pub fn new(cfg: SchemeConfig, policy: PagePolicyKind) -> Self {
        let placement = PagePlacement::new(policy, cfg.num_sets, cfg.num_ways);
        Self {
            core: SchemeCore::new(cfg),
            placement,
            tlb: HashMap::new(),
        }
    }

    fn wrap_ext(&self, line_addr: u64) -> u64 {
        let ext_lines = self.core.cfg.ext_size / 64;
        if ext_lines == 0 {
            line_addr
        } else {
            line_addr % ext_lines
        }
    }

    fn line_bit(address: u64, tag: u64) -> Result<u16, FatalError> {
        let bit = address
            .checked_sub(tag * 64)
            .map(|offset| offset / 4)
            .filter(|&bit| bit < 16)
            .ok_or_else(|| {
                FatalError::invariant(format!(
                    "page bit out of range for address {address:#x}, tag {tag:#x}"
                ))
            })?;
        Ok(1u16 << bit)
    }
}

impl CacheScheme for UnisonCache {
    fn access(&mut self, req: &mut MemRequest, mem: &mut DramPool) -> Result<Cycle, FatalError> {
        let rtype = req.req_type();
        let address = self.wrap_ext(req.line_addr);
        let select = self.core.mcdram_select(address);
        let mc_address = self.core.mc_address(address);
        let tag = self.core.tag_of(address);
        let set_num = self.core.set_of(tag);
        let num_ways = self.core.cfg.num_ways;
        let mut counter_access = false;

        let entry = *self
            .tlb
            .entry(tag)
            .or_insert_with(|| TlbEntry::vacant(num_ways));
        let hit_way = entry.way;
        if hit_way != num_ways {
            let way = self.core.tags.way(set_num, hit_way);
            if !way.valid || way.tag != tag {
                return Err(FatalError::invariant(format!(
                    "page map claims way {hit_way} of set {set_num} holds tag {tag:#x}"
                )));
            }
        } else if self.core.tags.find(set_num, tag).is_some() {
            return Err(FatalError::invariant(format!(
                "tag {tag:#x} resident in set {set_num} but absent from the page map"
            )));
        }

        // Tag and data access.
        if rtype == ReqType::Load {
            req.line_addr = mc_address;
            req.cycle = mem.mcdram[select].access(req, ChainMode::Fresh, 6);
            self.core.window.mc_bw += 6;
            self.core.stats.tag_load += 1;
            req.line_addr = address;
        } else {
            let tag_probe = MemRequest::new(mc_address, AccessKind::Gets, req.cycle);
            req.cycle = mem.mcdram[select].access(&tag_probe, ChainMode::Fresh, 2);
            self.core.window.mc_bw += 2;
            self.core.stats.tag_load += 1;
        }

        let data_ready_cycle;
        if hit_way != num_ways {
            self.core.record_hit();
            if rtype == ReqType::Store {
                let write_req = MemRequest::new(mc_address, AccessKind::Putx, req.cycle);
                req.cycle = mem.mcdram[select].access(&write_req, ChainMode::Chained, 4);
                self.core.window.mc_bw += 4;
                self.core.stats.store_hit += 1;
            } else {
                self.core.stats.load_hit += 1;
            }
            data_ready_cycle = req.cycle;
            self.placement
                .on_hit(tag, rtype, set_num, hit_way, &mut counter_access);

            // Recency update travels with the tags.
            let tag_update = MemRequest::new(mc_address, AccessKind::Putx, req.cycle);
            mem.mcdram[select].access(&tag_update, ChainMode::Sibling, 2);
            self.core.window.mc_bw += 2;
            self.core.stats.tag_store += 1;

            let bit = Self::line_bit(address, tag)?;
            let entry = self.tlb.get_mut(&tag).expect("entry inserted above");
            entry.touch_bitvec |= bit;
            if rtype == ReqType::Store {
                entry.dirty_bitvec |= bit;
            }
        } else {
            self.core.record_miss();
            match rtype {
                ReqType::Load => self.core.stats.load_miss += 1,
                ReqType::Store => self.core.stats.store_miss += 1,
            }

            let replace_way =
                self.placement
                    .on_miss(tag, rtype, set_num, &self.core.tags, &mut counter_access);

            if rtype == ReqType::Load || replace_way >= num_ways {
                req.cycle = mem.ext.access(req, ChainMode::Chained, 4);
                self.core.window.ext_bw += 4;
            }
            data_ready_cycle = req.cycle;

            if replace_way < num_ways {
                let victim = *self.core.tags.way(set_num, replace_way);
                if victim.valid {
                    let replaced = self
                        .tlb
                        .get_mut(&victim.tag)
                        .ok_or_else(|| {
                            FatalError::invariant(format!(
                                "evicting tag {:#x} with no page-map entry",
                                victim.tag
                            ))
                        })?;
                    replaced.way = num_ways;
                    let dirty_lines = replaced.dirty_bitvec.count_ones() as u64 * 4;
                    let touch_lines = replaced.touch_bitvec.count_ones() as u64 * 4;
                    if touch_lines == 0 || touch_lines > 64 || dirty_lines > 64 {
                        return Err(FatalError::invariant(format!(
                            "bitvec accounting out of range: touch={touch_lines} dirty={dirty_lines}"
                        )));
                    }
                    self.core.stats.total_touch_lines += touch_lines;
                    self.core.stats.total_evict_lines += dirty_lines;

                    if dirty_lines > 0 {
                        self.core.stats.dirty_evict += 1;
                        let load_req = MemRequest::new(mc_address, AccessKind::Gets, req.cycle);
                        mem.mcdram[select].access(
                            &load_req,
                            ChainMode::Sibling,
                            (dirty_lines * 4) as u32,
                        );
                        self.core.window.mc_bw += dirty_lines * 4;
                        let wb_req = MemRequest::new(victim.tag * 64, AccessKind::Putx, req.cycle);
                        mem.ext
                            .access(&wb_req, ChainMode::Sibling, (dirty_lines * 4) as u32);
                        self.core.window.ext_bw += dirty_lines * 4;
                    } else {
                        self.core.stats.clean_evict += 1;
                    }
                    self.core.tags.evict(set_num, replace_way);
                }

                // Fetch the predicted footprint of the new page and copy it
                // into MC-DRAM.
                let footprint = self.core.cfg.footprint_size;
                let load_req = MemRequest::new(tag * 64, AccessKind::Gets, req.cycle);
                mem.ext
                    .access(&load_req, ChainMode::Sibling, (footprint * 4) as u32);
                self.core.window.ext_bw += footprint * 4;

                let insert_req = MemRequest::new(mc_address, AccessKind::Putx, req.cycle);
                mem.mcdram[select].access(&insert_req, ChainMode::Sibling, (footprint * 4) as u32);
                if !self.core.cfg.sram_tag {
                    mem.mcdram[select].access(&insert_req, ChainMode::Sibling, 2);
                    self.core.window.mc_bw += 2;
                }
                self.core.window.mc_bw += footprint * 4;
                self.core.stats.tag_store += 1;
                self.core.stats.placement += 1;

                self.core
                    .tags
                    .install(set_num, replace_way, tag, rtype == ReqType::Store);
                let bit = Self::line_bit(address, tag)?;
                let entry = self.tlb.get_mut(&tag).expect("entry inserted above");
                entry.way = replace_way;
                entry.touch_bitvec = bit;
                entry.dirty_bitvec = if rtype == ReqType::Store { bit } else { 0 };
            }
        }

        if counter_access && !self.core.cfg.sram_tag {
            self.core.stats.counter_access += 1;
            let counter_req = MemRequest::new(mc_address, AccessKind::Gets, req.cycle);
            mem.mcdram[select].access(&counter_req, ChainMode::Sibling, 2);
            let counter_wb = MemRequest::new(mc_address, AccessKind::Putx, req.cycle);
            mem.mcdram[select].access(&counter_wb, ChainMode::Sibling, 2);
            self.core.window.mc_bw += 4;
        }

        Ok(data_ready_cycle)
    }

    fn period(&mut self, req: &mut MemRequest, mem: &mut DramPool) -> Result<(), FatalError> {
        let tlb = &mut self.tlb;
        let placement = &mut self.placement;
        let num_ways = self.core.cfg.num_ways;
        balance_bandwidth(&mut self.core, mem, req, |tag, set, _stats, _now| {
            if let Some(entry) = tlb.get_mut(&tag) {
                entry.way = num_ways;
            }
            placement.flush_chunk(set);
            Ok(())
        })
    }

    fn kind(&self) -> SchemeKind {
        SchemeKind::UnisonCache
    }

    fn core(&self) -> &SchemeCore {
        &self.core
    }
}
