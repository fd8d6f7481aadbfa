//! Banshee: page-granular cache that batches tag updates through a small
//! Tag Buffer so most hits skip the in-DRAM tag probe. Stores that miss
//! the buffer pay a hybrid probe; remap notifications pin entries until
//! the buffer is flushed wholesale.

use std::collections::HashMap;

use log::warn;

use crate::mem::device::{ChainMode, DramPool};
use crate::mem::error::FatalError;
use crate::mem::placement::{PagePlacement, PagePolicyKind};
use crate::mem::request::{AccessKind, Cycle, MemRequest, ReqType};
use crate::mem::scheme::unison::TlbEntry;
use crate::mem::scheme::{balance_bandwidth, CacheScheme, SchemeConfig, SchemeCore, SchemeKind};
use crate::mem::tag_buffer::TagBuffer;

const TAG_BUFFER_FLUSH_OCCUPANCY: f64 = 0.7;

#[derive(Debug)]
pub struct BansheeCache {
    core: SchemeCore,
    placement: PagePlacement,
    tlb: HashMap<u64, TlbEntry>,
    tag_buffer: TagBuffer,
}

impl BansheeCache {
    pub fn new(cfg: SchemeConfig, policy: PagePolicyKind, tag_buffer_size: u32) -> Self {
        let placement = PagePlacement::new(policy, cfg.num_sets, cfg.num_ways);
        Self {
            core: SchemeCore::new(cfg),
            placement,
            tlb: HashMap::new(),
            tag_buffer: TagBuffer::new(tag_buffer_size),
        }
    }

    pub fn tag_buffer(&self) -> &TagBuffer {
        &self.tag_buffer
    }
}

impl CacheScheme for BansheeCache {
    fn access(&mut self, req: &mut MemRequest, mem: &mut DramPool) -> Result<Cycle, FatalError> {
        let rtype = req.req_type();
        let address = req.line_addr;
        let select = self.core.mcdram_select(address);
        let mc_address = self.core.mc_address(address);
        let tag = self.core.tag_of(address);
        let set_num = self.core.set_of(tag);
        let num_ways = self.core.cfg.num_ways;
        let mut hybrid_tag_probe = false;
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

        // A store whose tag is not buffered must probe the in-DRAM tags to
        // learn the dirty state.
        if rtype == ReqType::Store {
            if self.tag_buffer.lookup(tag).is_none() && set_num >= self.core.ds_index {
                self.core.stats.tb_dirty_miss += 1;
                if !self.core.cfg.sram_tag {
                    hybrid_tag_probe = true;
                }
            } else {
                self.core.stats.tb_dirty_hit += 1;
            }
        }

        if self.core.cfg.sram_tag {
            req.cycle += self.core.cfg.llc_latency;
        }

        let data_ready_cycle;
        if hit_way != num_ways {
            self.core.record_hit();
            self.placement
                .on_hit(tag, rtype, set_num, hit_way, &mut counter_access);
            if rtype == ReqType::Store {
                self.core.tags.way_mut(set_num, hit_way).dirty = true;
                self.core.stats.store_hit += 1;
            } else {
                self.core.stats.load_hit += 1;
            }

            if !hybrid_tag_probe {
                req.line_addr = mc_address;
                req.cycle = mem.mcdram[select].access(req, ChainMode::Fresh, 4);
                self.core.window.mc_bw += 4;
                req.line_addr = address;
                data_ready_cycle = req.cycle;
                if rtype == ReqType::Load && self.tag_buffer.can_insert(tag) {
                    self.tag_buffer.insert(tag, false)?;
                }
            } else {
                let tag_probe = MemRequest::new(mc_address, AccessKind::Gets, req.cycle);
                req.cycle = mem.mcdram[select].access(&tag_probe, ChainMode::Fresh, 2);
                self.core.window.mc_bw += 2;
                self.core.stats.tag_load += 1;
                req.line_addr = mc_address;
                req.cycle = mem.mcdram[select].access(req, ChainMode::Chained, 4);
                self.core.window.mc_bw += 4;
                req.line_addr = address;
                data_ready_cycle = req.cycle;
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

            if hybrid_tag_probe {
                let tag_probe = MemRequest::new(mc_address, AccessKind::Gets, req.cycle);
                req.cycle = mem.mcdram[select].access(&tag_probe, ChainMode::Fresh, 2);
                self.core.window.mc_bw += 2;
                req.cycle = mem.ext.access(req, ChainMode::Chained, 4);
                self.core.window.ext_bw += 4;
                self.core.stats.tag_load += 1;
            } else {
                req.cycle = mem.ext.access(req, ChainMode::Fresh, 4);
                self.core.window.ext_bw += 4;
            }
            data_ready_cycle = req.cycle;

            if replace_way < num_ways {
                let bursts = self.core.cfg.granularity_lines() as u32 * 4;
                let victim = *self.core.tags.way(set_num, replace_way);
                if victim.valid {
                    let replaced_tag = victim.tag;
                    if let Some(entry) = self.tlb.get_mut(&replaced_tag) {
                        entry.way = num_ways;
                    }

                    if victim.dirty {
                        self.core.stats.dirty_evict += 1;
                        let load_req = MemRequest::new(mc_address, AccessKind::Gets, req.cycle);
                        mem.mcdram[select].access(&load_req, ChainMode::Sibling, bursts);
                        self.core.window.mc_bw += bursts as u64;
                        let wb_req = MemRequest::new(replaced_tag * 64, AccessKind::Putx, req.cycle);
                        mem.ext.access(&wb_req, ChainMode::Sibling, bursts);
                        self.core.window.ext_bw += bursts as u64;
                    } else {
                        self.core.stats.clean_evict += 1;
                    }

                    // Both the incoming and the outgoing tag carry remap
                    // notifications; flush the buffer when they do not fit.
                    if !self.tag_buffer.can_insert_pair(tag, replaced_tag) {
                        self.tag_buffer.clear(req.cycle);
                        self.core.stats.tag_buffer_flush += 1;
                    }
                    if !self.tag_buffer.can_insert_pair(tag, replaced_tag) {
                        return Err(FatalError::invariant(format!(
                            "tag buffer cannot hold {tag:#x}/{replaced_tag:#x} after a flush"
                        )));
                    }
                    self.tag_buffer.insert(tag, true)?;
                    self.tag_buffer.insert(replaced_tag, true)?;
                    self.core.tags.evict(set_num, replace_way);
                }

                let load_req = MemRequest::new(tag * 64, AccessKind::Gets, req.cycle);
                mem.ext.access(&load_req, ChainMode::Sibling, bursts);
                self.core.window.ext_bw += bursts as u64;

                let insert_req = MemRequest::new(mc_address, AccessKind::Putx, req.cycle);
                mem.mcdram[select].access(&insert_req, ChainMode::Sibling, bursts);
                if !self.core.cfg.sram_tag {
                    mem.mcdram[select].access(&insert_req, ChainMode::Sibling, 2);
                    self.core.window.mc_bw += 2;
                }
                self.core.window.mc_bw += bursts as u64;
                self.core.stats.tag_store += 1;
                self.core.stats.placement += 1;

                self.core
                    .tags
                    .install(set_num, replace_way, tag, rtype == ReqType::Store);
                self.tlb
                    .get_mut(&tag)
                    .expect("entry inserted above")
                    .way = replace_way;
            } else if rtype == ReqType::Load && self.tag_buffer.can_insert(tag) {
                self.tag_buffer.insert(tag, false)?;
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

        if self.tag_buffer.occupancy() > TAG_BUFFER_FLUSH_OCCUPANCY {
            warn!(
                "tag buffer flush at occupancy {:.2}",
                self.tag_buffer.occupancy()
            );
            self.tag_buffer.clear(req.cycle);
            self.core.stats.tag_buffer_flush += 1;
        }

        Ok(data_ready_cycle)
    }

    fn period(&mut self, req: &mut MemRequest, mem: &mut DramPool) -> Result<(), FatalError> {
        let tlb = &mut self.tlb;
        let placement = &mut self.placement;
        let tag_buffer = &mut self.tag_buffer;
        let num_ways = self.core.cfg.num_ways;
        balance_bandwidth(&mut self.core, mem, req, |tag, set, stats, now| {
            if let Some(entry) = tlb.get_mut(&tag) {
                entry.way = num_ways;
            }
            if !tag_buffer.can_insert(tag) {
                warn!(
                    "rebalance tag buffer flush at occupancy {:.2}",
                    tag_buffer.occupancy()
                );
                tag_buffer.clear(now);
                stats.tag_buffer_flush += 1;
            }
            if !tag_buffer.can_insert(tag) {
                return Err(FatalError::invariant(format!(
                    "tag buffer cannot hold evicted tag {tag:#x} after a flush"
                )));
            }
            tag_buffer.insert(tag, true)?;
            placement.flush_chunk(set);
            Ok(())
        })
    }

    fn kind(&self) -> SchemeKind {
        SchemeKind::BansheeCache
    }

    fn core(&self) -> &SchemeCore {
        &self.core
    }
}
