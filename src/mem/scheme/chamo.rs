//! CHAMO: direct-mapped line cache whose set index comes from the cuckoo
//! index rather than a plain modulus, trading index bookkeeping for fewer
//! conflict misses.

use crate::mem::cuckoo::CuckooIndex;
use crate::mem::device::{ChainMode, DramPool};
use crate::mem::error::FatalError;
use crate::mem::request::{AccessKind, Cycle, MemRequest, ReqType};
use crate::mem::scheme::{balance_bandwidth, CacheScheme, SchemeConfig, SchemeCore, SchemeKind};

#[derive(Debug)]
pub struct ChamoCache {
    core: SchemeCore,
    index: CuckooIndex,
}

impl ChamoCache {
    pub fn new(cfg: SchemeConfig) -> Result<Self, FatalError> {
        if cfg.granularity != 64 {
            return Err(FatalError::config(format!(
                "CHAMO is line-granular, got granularity {}",
                cfg.granularity
            )));
        }
        let index = CuckooIndex::new(cfg.cache_size / 64, cfg.ext_size / 64)?;
        Ok(Self {
            core: SchemeCore::new(cfg),
            index,
        })
    }

    pub fn cuckoo_index(&self) -> &CuckooIndex {
        &self.index
    }

    fn wrap_ext(&self, line_addr: u64) -> u64 {
        line_addr % (self.core.cfg.ext_size / 64)
    }
}

impl CacheScheme for ChamoCache {
    fn access(&mut self, req: &mut MemRequest, mem: &mut DramPool) -> Result<Cycle, FatalError> {
        let rtype = req.req_type();
        let address = self.wrap_ext(req.line_addr);
        let tag = address;

        let set_num = self.index.locate(address)?;
        let mc_address = set_num;
        if mc_address >= self.core.cfg.cache_size / 64 {
            return Err(FatalError::invariant(format!(
                "cuckoo index produced cache line {mc_address:#x} beyond capacity"
            )));
        }

        let way0 = *self.core.tags.way(set_num, 0);
        let hit = way0.valid && way0.tag == tag;

        // In-subarray tag matching rides along with the data access.
        let kind = match rtype {
            ReqType::Load => AccessKind::Gets,
            ReqType::Store => AccessKind::Putx,
        };
        let mc_req = MemRequest::new(mc_address, kind, req.cycle);
        req.cycle = mem.mcdram[0].access(&mc_req, ChainMode::Fresh, 4);
        self.core.window.mc_bw += 4;

        let data_ready_cycle;
        if hit {
            self.core.record_hit();
            if rtype == ReqType::Store {
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

            let fetch = MemRequest::new(address, AccessKind::Gets, req.cycle);
            data_ready_cycle = mem.ext.access(&fetch, ChainMode::Chained, 4);
            self.core.window.ext_bw += 4;

            if way0.valid {
                if way0.dirty {
                    self.core.stats.dirty_evict += 1;
                    let wb_req = MemRequest::new(way0.tag * 64, AccessKind::Putx, req.cycle);
                    mem.ext.access(&wb_req, ChainMode::Sibling, 4);
                    self.core.window.ext_bw += 4;
                } else {
                    self.core.stats.clean_evict += 1;
                }
                self.core.tags.evict(set_num, 0);
            }
            self.core
                .tags
                .install(set_num, 0, tag, rtype == ReqType::Store);
        }

        Ok(data_ready_cycle)
    }

    fn period(&mut self, req: &mut MemRequest, mem: &mut DramPool) -> Result<(), FatalError> {
        balance_bandwidth(&mut self.core, mem, req, |_, _, _, _| Ok(()))
    }

    fn kind(&self) -> SchemeKind {
        SchemeKind::Chamo
    }

    fn core(&self) -> &SchemeCore {
        &self.core
    }

    fn extra_stats(&self) -> serde_json::Value {
        serde_json::to_value(self.index.metrics()).unwrap_or_default()
    }
}
