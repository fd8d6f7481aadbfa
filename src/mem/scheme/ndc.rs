//! NDC: line-granular cache indexed through the DRAM address codec, with
//! a bounded victim buffer that absorbs dirty write-backs. The buffer
//! drains opportunistically on hits; when it saturates, write-backs go
//! out inline.

use crate::mem::addr::{AddrConfig, AddressCodec};
use crate::mem::device::{ChainMode, DramPool};
use crate::mem::error::FatalError;
use crate::mem::hash::Lcg48;
use crate::mem::request::{AccessKind, Cycle, MemRequest, ReqType};
use crate::mem::scheme::{balance_bandwidth, CacheScheme, SchemeConfig, SchemeCore, SchemeKind};
use crate::mem::stats::UtilStats;
use crate::mem::victim_buffer::VictimBuffer;

#[derive(Debug)]
pub struct NdcCache {
    core: SchemeCore,
    codec: AddressCodec,
    victim_buffer: VictimBuffer,
    rng: Lcg48,
    util: UtilStats,
}

impl NdcCache {
    pub fn new(
        cfg: SchemeConfig,
        addr: AddrConfig,
        victim_buffer_size: usize,
        controller_id: u64,
    ) -> Result<Self, FatalError> {
        if cfg.granularity != 64 {
            return Err(FatalError::config(format!(
                "NDC is line-granular, got granularity {}",
                cfg.granularity
            )));
        }
        if cfg.mcdram_per_mc != 1 {
            return Err(FatalError::config(format!(
                "NDC drives a single MC-DRAM device, got {}",
                cfg.mcdram_per_mc
            )));
        }
        let codec = AddressCodec::new(addr, cfg.num_sets)?;
        let util = UtilStats::new(
            cfg.cache_size / 64,
            cfg.ext_size / 64,
            cfg.ext_size / cfg.page_size.max(1),
        );
        Ok(Self {
            core: SchemeCore::new(cfg),
            codec,
            victim_buffer: VictimBuffer::new(victim_buffer_size),
            rng: Lcg48::new(controller_id),
            util,
        })
    }

    pub fn victim_buffer(&self) -> &VictimBuffer {
        &self.victim_buffer
    }

    /// Invalid ways beat clean ways beat dirty ways; ties break by a
    /// uniform draw from the per-controller PRNG.
    fn select_victim(&mut self, set: u64) -> u64 {
        let mut candidates = Vec::new();
        for preference in 0..3 {
            for way in 0..self.core.tags.num_ways() {
                let meta = self.core.tags.way(set, way);
                let class = if !meta.valid {
                    0
                } else if !meta.dirty {
                    1
                } else {
                    2
                };
                if class == preference {
                    candidates.push(way);
                }
            }
            if !candidates.is_empty() {
                break;
            }
        }
        candidates[self.rng.next_below(candidates.len() as u64) as usize]
    }

    /// Retires at most one buffered victim, and only when this access left
    /// the external channel idle.
    fn drain_one(&mut self, req: &MemRequest, mem: &mut DramPool) {
        if let Some(entry) = self.victim_buffer.pop() {
            let wb_req = MemRequest::new(entry.address, AccessKind::Putx, req.cycle);
            mem.ext.access(&wb_req, ChainMode::Sibling, 4);
            self.core.window.ext_bw += 4;
        }
    }
}

impl CacheScheme for NdcCache {
    fn access(&mut self, req: &mut MemRequest, mem: &mut DramPool) -> Result<Cycle, FatalError> {
        let rtype = req.req_type();
        let address = req.line_addr;
        let set_num = self.codec.set_of(address);
        let tag = self.codec.tag_of(address);
        let cache_addr = self.codec.compose(set_num, 0);
        let lines_per_page = self.core.cfg.page_size / 64;
        self.util.record_ext(address, lines_per_page);

        let hit_way = self.core.tags.find(set_num, tag);
        let data_ready_cycle;

        if let Some(way) = hit_way {
            self.core.record_hit();
            let kind = match rtype {
                ReqType::Load => AccessKind::Gets,
                ReqType::Store => AccessKind::Putx,
            };
            let mc_req = MemRequest::new(cache_addr, kind, req.cycle);
            req.cycle = mem.mcdram[0].access(&mc_req, ChainMode::Fresh, 4);
            self.core.window.mc_bw += 4;
            if rtype == ReqType::Store {
                self.core.tags.way_mut(set_num, way).dirty = true;
                self.core.stats.store_hit += 1;
            } else {
                self.core.stats.load_hit += 1;
            }
            self.util
                .record_line(set_num * self.core.tags.num_ways() + way);
            data_ready_cycle = req.cycle;
            self.drain_one(req, mem);
        } else {
            self.core.record_miss();
            match rtype {
                ReqType::Load => self.core.stats.load_miss += 1,
                ReqType::Store => self.core.stats.store_miss += 1,
            }

            // The probe still walks the in-subarray tags.
            let probe = MemRequest::new(cache_addr, AccessKind::Gets, req.cycle);
            req.cycle = mem.mcdram[0].access(&probe, ChainMode::Fresh, 4);
            self.core.window.mc_bw += 4;

            req.cycle = mem.ext.access(req, ChainMode::Chained, 4);
            self.core.window.ext_bw += 4;
            data_ready_cycle = req.cycle;

            let victim_way = self.select_victim(set_num);
            let victim = *self.core.tags.way(set_num, victim_way);
            if victim.valid {
                if victim.dirty {
                    self.core.stats.dirty_evict += 1;
                    let victim_addr = self.codec.compose(set_num, victim.tag);
                    if self.victim_buffer.reserve_slot() {
                        if !self.victim_buffer.push(victim_addr, set_num, victim_way) {
                            return Err(FatalError::invariant(
                                "victim buffer rejected a reserved push".to_string(),
                            ));
                        }
                    } else {
                        let wb_req = MemRequest::new(victim_addr, AccessKind::Putx, req.cycle);
                        mem.ext.access(&wb_req, ChainMode::Sibling, 4);
                        self.core.window.ext_bw += 4;
                    }
                } else {
                    self.core.stats.clean_evict += 1;
                }
                self.core.tags.evict(set_num, victim_way);
            }
            self.core
                .tags
                .install(set_num, victim_way, tag, rtype == ReqType::Store);
            self.core.stats.placement += 1;
            self.util
                .record_line(set_num * self.core.tags.num_ways() + victim_way);
        }

        Ok(data_ready_cycle)
    }

    fn period(&mut self, req: &mut MemRequest, mem: &mut DramPool) -> Result<(), FatalError> {
        balance_bandwidth(&mut self.core, mem, req, |_, _, _, _| Ok(()))
    }

    fn kind(&self) -> SchemeKind {
        SchemeKind::Ndc
    }

    fn core(&self) -> &SchemeCore {
        &self.core
    }

    fn util_stats(&self) -> Option<&UtilStats> {
        Some(&self.util)
    }
}
