//! The per-scheme access state machines. Every scheme shares the same
//! entry points (`access`, `period`) over the same tag-array shape; the
//! controller owns exactly one of them behind a trait object.

mod alloy;
mod banshee;
mod chamo;
mod hotness;
mod ideal;
mod ndc;
mod nocache;
mod unison;

#[cfg(test)]
mod tests;

pub use alloy::AlloyCache;
pub use banshee::BansheeCache;
pub use chamo::ChamoCache;
pub use hotness::IdealHotness;
pub use ideal::{IdealCache, IdealPolicy};
pub use ndc::NdcCache;
pub use nocache::{CacheOnly, NoCache};
pub use unison::UnisonCache;

use log::info;
use serde_json::json;

use crate::mem::addr::AddrConfig;
use crate::mem::device::{ChainMode, DramPool};
use crate::mem::error::FatalError;
use crate::mem::placement::PagePolicyKind;
use crate::mem::request::{AccessKind, Cycle, MemRequest};
use crate::mem::stats::{SchemeStats, UtilStats};
use crate::mem::tag_array::TagArray;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeKind {
    NoCache,
    CacheOnly,
    AlloyCache,
    UnisonCache,
    BansheeCache,
    Ndc,
    Chamo,
    IdealBalanced,
    IdealAssociative,
    IdealFully,
    IdealHotness,
}

impl SchemeKind {
    pub fn parse(name: &str) -> Result<Self, FatalError> {
        match name {
            "NoCache" => Ok(Self::NoCache),
            "CacheOnly" => Ok(Self::CacheOnly),
            "AlloyCache" => Ok(Self::AlloyCache),
            "UnisonCache" => Ok(Self::UnisonCache),
            "BansheeCache" => Ok(Self::BansheeCache),
            "NDC" => Ok(Self::Ndc),
            "CHAMO" => Ok(Self::Chamo),
            "IdealBalanced" => Ok(Self::IdealBalanced),
            "IdealAssociative" => Ok(Self::IdealAssociative),
            "IdealFully" => Ok(Self::IdealFully),
            "IdealHotness" => Ok(Self::IdealHotness),
            other => Err(FatalError::config(format!("invalid cache scheme {other}"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::NoCache => "NoCache",
            Self::CacheOnly => "CacheOnly",
            Self::AlloyCache => "AlloyCache",
            Self::UnisonCache => "UnisonCache",
            Self::BansheeCache => "BansheeCache",
            Self::Ndc => "NDC",
            Self::Chamo => "CHAMO",
            Self::IdealBalanced => "IdealBalanced",
            Self::IdealAssociative => "IdealAssociative",
            Self::IdealFully => "IdealFully",
            Self::IdealHotness => "IdealHotness",
        }
    }
}

/// Geometry and mode switches shared by every scheme. Read-only after
/// construction.
#[derive(Debug, Clone)]
pub struct SchemeConfig {
    pub granularity: u64,
    pub num_ways: u64,
    pub cache_size: u64,
    pub ext_size: u64,
    pub page_size: u64,
    pub sram_tag: bool,
    pub llc_latency: u64,
    pub bw_balance: bool,
    pub mcdram_per_mc: u64,
    pub footprint_size: u64,
    pub num_sets: u64,
}

impl SchemeConfig {
    /// Derives the set count; `num_ways == 0` selects a single fully
    /// associative set.
    pub fn resolve(
        granularity: u64,
        num_ways: u64,
        cache_size: u64,
        ext_size: u64,
        page_size: u64,
        sram_tag: bool,
        llc_latency: u64,
        bw_balance: bool,
        mcdram_per_mc: u64,
        footprint_size: u64,
    ) -> Result<Self, FatalError> {
        if granularity < 64 || !granularity.is_power_of_two() {
            return Err(FatalError::config(format!(
                "cache granularity {granularity} must be a power of two >= 64"
            )));
        }
        let (num_ways, num_sets) = if num_ways == 0 {
            (cache_size / granularity, 1)
        } else {
            (num_ways, cache_size / num_ways / granularity)
        };
        if num_sets * num_ways * granularity > cache_size {
            return Err(FatalError::config(format!(
                "{num_sets} sets x {num_ways} ways x {granularity} B exceed cache size {cache_size}"
            )));
        }
        Ok(Self {
            granularity,
            num_ways,
            cache_size,
            ext_size,
            page_size,
            sram_tag,
            llc_latency,
            bw_balance,
            mcdram_per_mc: mcdram_per_mc.max(1),
            footprint_size,
            num_sets: num_sets.max(1),
        })
    }

    pub fn granularity_lines(&self) -> u64 {
        self.granularity / 64
    }
}

/// Hit/miss and device-bandwidth window over the current rebalance step.
/// Units of the bandwidth fields are bursts.
#[derive(Debug, Clone, Copy, Default)]
pub struct BwWindow {
    pub mc_bw: u64,
    pub ext_bw: u64,
    pub hits: u64,
    pub misses: u64,
}

impl BwWindow {
    pub fn decay(&mut self) {
        self.mc_bw /= 2;
        self.ext_bw /= 2;
        self.hits /= 2;
        self.misses /= 2;
    }

    pub fn ratio(&self) -> Option<f64> {
        let total = self.mc_bw + self.ext_bw;
        if total == 0 {
            None
        } else {
            Some(self.mc_bw as f64 / total as f64)
        }
    }
}

/// State every scheme embeds: the tag array, the disable index, the
/// bandwidth window, and the counter block.
#[derive(Debug)]
pub struct SchemeCore {
    pub cfg: SchemeConfig,
    pub tags: TagArray,
    pub ds_index: u64,
    pub window: BwWindow,
    pub stats: SchemeStats,
}

impl SchemeCore {
    pub fn new(cfg: SchemeConfig) -> Self {
        let tags = TagArray::new(cfg.num_sets, cfg.num_ways);
        Self {
            cfg,
            tags,
            ds_index: 0,
            window: BwWindow::default(),
            stats: SchemeStats::default(),
        }
    }

    pub fn mcdram_select(&self, addr: u64) -> usize {
        ((addr / 64) % self.cfg.mcdram_per_mc) as usize
    }

    pub fn mc_address(&self, addr: u64) -> u64 {
        (addr / 64 / self.cfg.mcdram_per_mc * 64) | (addr % 64)
    }

    pub fn tag_of(&self, addr: u64) -> u64 {
        addr / self.cfg.granularity_lines()
    }

    pub fn set_of(&self, tag: u64) -> u64 {
        tag % self.cfg.num_sets
    }

    pub fn recent_miss_rate(&self) -> f64 {
        let total = self.window.hits + self.window.misses;
        if total == 0 {
            0.0
        } else {
            self.window.misses as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.window.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.window.misses += 1;
    }
}

/// Knobs the controller hands to the scheme builder beyond the shared
/// geometry.
#[derive(Debug, Clone)]
pub struct SchemeParams {
    pub kind: SchemeKind,
    pub cfg: SchemeConfig,
    pub placement: PagePolicyKind,
    pub tag_buffer_size: u32,
    pub victim_buffer_size: usize,
    pub addr: AddrConfig,
    pub controller_id: u64,
}

pub trait CacheScheme: Send {
    fn access(&mut self, req: &mut MemRequest, mem: &mut DramPool) -> Result<Cycle, FatalError>;

    /// Invoked by the controller every `step_length` accesses.
    fn period(&mut self, req: &mut MemRequest, mem: &mut DramPool) -> Result<(), FatalError>;

    fn kind(&self) -> SchemeKind;

    fn core(&self) -> &SchemeCore;

    fn util_stats(&self) -> Option<&UtilStats> {
        None
    }

    /// Scheme-specific metric block appended to the stats report.
    fn extra_stats(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn stats(&self) -> &SchemeStats {
        &self.core().stats
    }

    fn ds_index(&self) -> u64 {
        self.core().ds_index
    }

    fn tag_array(&self) -> &TagArray {
        &self.core().tags
    }

    fn recent_miss_rate(&self) -> f64 {
        self.core().recent_miss_rate()
    }

    fn stats_report(&self) -> serde_json::Value {
        let mut report = json!({
            "scheme": self.kind().name(),
            "counters": self.stats(),
        });
        if let Some(util) = self.util_stats() {
            report["utilisation"] = serde_json::to_value(util.snapshot()).unwrap_or_default();
        }
        let extra = self.extra_stats();
        if !extra.is_null() {
            report["extra"] = extra;
        }
        report
    }
}

pub fn build_scheme(params: SchemeParams) -> Result<Box<dyn CacheScheme>, FatalError> {
    Ok(match params.kind {
        SchemeKind::NoCache => Box::new(NoCache::new(params.cfg)),
        SchemeKind::CacheOnly => Box::new(CacheOnly::new(params.cfg)),
        SchemeKind::AlloyCache => Box::new(AlloyCache::new(params.cfg)),
        SchemeKind::UnisonCache => Box::new(unison::UnisonCache::new(params.cfg, params.placement)),
        SchemeKind::BansheeCache => Box::new(BansheeCache::new(
            params.cfg,
            params.placement,
            params.tag_buffer_size,
        )),
        SchemeKind::Ndc => Box::new(NdcCache::new(
            params.cfg,
            params.addr,
            params.victim_buffer_size,
            params.controller_id,
        )?),
        SchemeKind::Chamo => Box::new(ChamoCache::new(params.cfg)?),
        SchemeKind::IdealBalanced | SchemeKind::IdealAssociative | SchemeKind::IdealFully => {
            Box::new(IdealCache::new(params.cfg, params.kind)?)
        }
        SchemeKind::IdealHotness => Box::new(IdealHotness::new(params.cfg)?),
    })
}

/// Shared bandwidth-balance step: decay the window, derive the disable
/// index delta from the MC/external bandwidth ratio, and bulk-evict the
/// newly bypassed sets. `on_evict` runs once per valid way so schemes can
/// demote side structures.
pub(crate) fn balance_bandwidth<F>(
    core: &mut SchemeCore,
    mem: &mut DramPool,
    req: &MemRequest,
    mut on_evict: F,
) -> Result<(), FatalError>
where
    F: FnMut(u64, u64, &mut SchemeStats, Cycle) -> Result<(), FatalError>,
{
    core.window.decay();
    if !core.cfg.bw_balance {
        return Ok(());
    }
    let Some(ratio) = core.window.ratio() else {
        return Ok(());
    };

    const TARGET_RATIO: f64 = 0.8;
    const DEADBAND: f64 = 0.02;
    let index_step = core.cfg.num_sets / 1000;
    let diff = ratio - TARGET_RATIO;
    let delta = if diff.abs() < DEADBAND {
        0i64
    } else {
        (index_step as f64 * diff / 0.01) as i64
    };
    info!("bandwidth ratio = {ratio:.4}, delta = {delta}");

    if delta > 0 {
        let first = core.ds_index;
        let last = (core.ds_index + delta as u64).min(core.cfg.num_sets);
        let bursts = core.cfg.granularity_lines() as u32 * 4;
        let SchemeCore {
            cfg,
            tags,
            window,
            stats,
            ..
        } = core;
        for mc in 0..cfg.mcdram_per_mc as usize {
            for set in first..last {
                for way in 0..tags.num_ways() {
                    let meta = *tags.way(set, way);
                    if meta.valid && meta.dirty {
                        let load_req = MemRequest::new(meta.tag * 64, AccessKind::Gets, req.cycle);
                        mem.mcdram[mc].access(&load_req, ChainMode::Sibling, bursts);
                        let wb_req = MemRequest::new(meta.tag * 64, AccessKind::Putx, req.cycle);
                        mem.ext.access(&wb_req, ChainMode::Sibling, bursts);
                        window.mc_bw += bursts as u64;
                        window.ext_bw += bursts as u64;
                    }
                    if meta.valid {
                        on_evict(meta.tag, set, stats, req.cycle)?;
                    }
                    tags.evict(set, way);
                }
            }
        }
    }

    let next = (core.ds_index as i64 + delta).clamp(0, core.cfg.num_sets as i64) as u64;
    if next != core.ds_index {
        info!("ds_index {} -> {}/{}", core.ds_index, next, core.cfg.num_sets);
        core.ds_index = next;
    }
    Ok(())
}
