//! Baselines: NoCache sends everything to the external DRAM, CacheOnly
//! sends everything to MC-DRAM to measure its peak bandwidth.

use crate::mem::device::{ChainMode, DramPool};
use crate::mem::error::FatalError;
use crate::mem::request::{Cycle, MemRequest, ReqType};
use crate::mem::scheme::{balance_bandwidth, CacheScheme, SchemeConfig, SchemeCore, SchemeKind};
use crate::mem::stats::UtilStats;

#[derive(Debug)]
pub struct NoCache {
    core: SchemeCore,
}

impl NoCache {
    pub fn new(cfg: SchemeConfig) -> Self {
        Self {
            core: SchemeCore::new(cfg),
        }
    }
}

impl CacheScheme for NoCache {
    fn access(&mut self, req: &mut MemRequest, mem: &mut DramPool) -> Result<Cycle, FatalError> {
        req.cycle = mem.ext.access(req, ChainMode::Fresh, 4);
        self.core.window.ext_bw += 4;
        match req.req_type() {
            ReqType::Load => self.core.stats.load_hit += 1,
            ReqType::Store => self.core.stats.store_hit += 1,
        }
        self.core.record_hit();
        Ok(req.cycle)
    }

    fn period(&mut self, req: &mut MemRequest, mem: &mut DramPool) -> Result<(), FatalError> {
        balance_bandwidth(&mut self.core, mem, req, |_, _, _, _| Ok(()))
    }

    fn kind(&self) -> SchemeKind {
        SchemeKind::NoCache
    }

    fn core(&self) -> &SchemeCore {
        &self.core
    }
}

#[derive(Debug)]
pub struct CacheOnly {
    core: SchemeCore,
    util: UtilStats,
}

impl CacheOnly {
    pub fn new(cfg: SchemeConfig) -> Self {
        let util = UtilStats::new(
            cfg.cache_size / 64,
            cfg.ext_size / 64,
            cfg.ext_size / cfg.page_size.max(1),
        );
        Self {
            core: SchemeCore::new(cfg),
            util,
        }
    }
}

impl CacheScheme for CacheOnly {
    fn access(&mut self, req: &mut MemRequest, mem: &mut DramPool) -> Result<Cycle, FatalError> {
        let address = req.line_addr;
        let select = self.core.mcdram_select(address);
        let mc_address = self.core.mc_address(address);

        req.line_addr = mc_address;
        req.cycle = mem.mcdram[select].access(req, ChainMode::Fresh, 4);
        req.line_addr = address;
        self.core.window.mc_bw += 4;
        self.core.stats.load_hit += 1;
        self.core.record_hit();
        self.util.record_line(mc_address);
        Ok(req.cycle)
    }

    fn period(&mut self, req: &mut MemRequest, mem: &mut DramPool) -> Result<(), FatalError> {
        balance_bandwidth(&mut self.core, mem, req, |_, _, _, _| Ok(()))
    }

    fn kind(&self) -> SchemeKind {
        SchemeKind::CacheOnly
    }

    fn core(&self) -> &SchemeCore {
        &self.core
    }

    fn util_stats(&self) -> Option<&UtilStats> {
        Some(&self.util)
    }
}
