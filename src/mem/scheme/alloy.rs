//! Alloy: direct-mapped line-granular cache. Tag and data live in the
//! same MC-DRAM row (a 6-burst TAD access) unless the tags sit in SRAM,
//! in which case a probe only costs the LLC latency.

use crate::mem::device::{ChainMode, DramPool};
use crate::mem::error::FatalError;
use crate::mem::placement::LinePlacement;
use crate::mem::request::{AccessKind, Cycle, MemRequest, ReqType};
use crate::mem::scheme::{balance_bandwidth, CacheScheme, SchemeConfig, SchemeCore, SchemeKind};

#[derive(Debug)]
pub struct AlloyCache {
    core: SchemeCore,
    placement: LinePlacement,
}

impl AlloyCache {
    pub fn new(cfg: SchemeConfig) -> Self {
        Self {
            core: SchemeCore::new(cfg),
            placement: LinePlacement,
        }
    }
}

impl CacheScheme for AlloyCache {
    fn access(&mut self, req: &mut MemRequest, mem: &mut DramPool) -> Result<Cycle, FatalError> {
        let rtype = req.req_type();
        let address = req.line_addr;
        let select = self.core.mcdram_select(address);
        let mc_address = self.core.mc_address(address);
        let tag = self.core.tag_of(address);
        let set_num = self.core.set_of(tag);
        let mut data_ready_cycle = req.cycle;
        let counter_access = false;

        let way0 = *self.core.tags.way(set_num, 0);
        let hit = way0.valid && way0.tag == tag && set_num >= self.core.ds_index;

        // Tag probe for loads above the disable index.
        if rtype == ReqType::Load && set_num >= self.core.ds_index {
            if self.core.cfg.sram_tag {
                req.cycle += self.core.cfg.llc_latency;
            } else {
                req.line_addr = mc_address;
                req.cycle = mem.mcdram[select].access(req, ChainMode::Fresh, 6);
                self.core.window.mc_bw += 6;
                self.core.stats.tag_load += 1;
                req.line_addr = address;
            }
        }

        if hit {
            self.core.record_hit();
            if rtype == ReqType::Load && self.core.cfg.sram_tag {
                let read_req = MemRequest::new(mc_address, AccessKind::Getx, req.cycle);
                req.cycle = mem.mcdram[select].access(&read_req, ChainMode::Fresh, 4);
                self.core.window.mc_bw += 4;
            }
            if rtype == ReqType::Store {
                let write_req = MemRequest::new(mc_address, AccessKind::Putx, req.cycle);
                req.cycle = mem.mcdram[select].access(&write_req, ChainMode::Fresh, 4);
                self.core.window.mc_bw += 4;
                self.core.tags.way_mut(set_num, 0).dirty = true;
                self.core.stats.store_hit += 1;
            } else {
                self.core.stats.load_hit += 1;
            }
            data_ready_cycle = req.cycle;
        } else {
            self.core.record_miss();
            match rtype {
                ReqType::Load => self.core.stats.load_miss += 1,
                ReqType::Store => self.core.stats.store_miss += 1,
            }

            let place = set_num >= self.core.ds_index && self.placement.on_miss();

            if rtype == ReqType::Load {
                let mode = if !self.core.cfg.sram_tag && set_num >= self.core.ds_index {
                    ChainMode::Chained
                } else {
                    ChainMode::Fresh
                };
                req.cycle = mem.ext.access(req, mode, 4);
                self.core.window.ext_bw += 4;
                data_ready_cycle = req.cycle;
            } else if !place {
                req.cycle = mem.ext.access(req, ChainMode::Fresh, 4);
                self.core.window.ext_bw += 4;
                data_ready_cycle = req.cycle;
            } else {
                // Write miss that fills the cache: fetch the rest of the
                // line before merging the store.
                let load_req = MemRequest::new(address, AccessKind::Gets, req.cycle);
                req.cycle = mem.ext.access(&load_req, ChainMode::Fresh, 4);
                self.core.window.ext_bw += 4;
                data_ready_cycle = req.cycle;
            }

            if place {
                let insert_req = MemRequest::new(mc_address, AccessKind::Putx, req.cycle);
                let size = if self.core.cfg.sram_tag { 4 } else { 6 };
                mem.mcdram[select].access(&insert_req, ChainMode::Sibling, size);
                self.core.window.mc_bw += size as u64;
                self.core.stats.tag_store += 1;
                self.core.stats.placement += 1;

                let victim = *self.core.tags.way(set_num, 0);
                if victim.valid {
                    if victim.dirty {
                        self.core.stats.dirty_evict += 1;
                        if rtype == ReqType::Store && self.core.cfg.sram_tag {
                            let load_req = MemRequest::new(mc_address, AccessKind::Gets, req.cycle);
                            req.cycle = mem.mcdram[select].access(&load_req, ChainMode::Sibling, 4);
                            self.core.window.mc_bw += 4;
                        }
                        let wb_req = MemRequest::new(victim.tag * 64, AccessKind::Putx, req.cycle);
                        mem.ext.access(&wb_req, ChainMode::Sibling, 4);
                        self.core.window.ext_bw += 4;
                    } else {
                        self.core.stats.clean_evict += 1;
                    }
                    self.core.tags.evict(set_num, 0);
                }
                self.core
                    .tags
                    .install(set_num, 0, tag, req.kind == AccessKind::Putx);
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
        balance_bandwidth(&mut self.core, mem, req, |_, _, _, _| Ok(()))
    }

    fn kind(&self) -> SchemeKind {
        SchemeKind::AlloyCache
    }

    fn core(&self) -> &SchemeCore {
        &self.core
    }
}
