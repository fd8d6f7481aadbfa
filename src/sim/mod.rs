pub mod config;
pub mod stats_dump;

use std::path::Path;

use crate::mem::addr::AddrConfig;
use crate::mem::controller::MemoryController;
use crate::mem::device::{DeviceConfig, DramDevice, DramPool};
use crate::mem::error::FatalError;
use crate::mem::page_map::PageMapMode;
use crate::mem::placement::PagePolicyKind;
use crate::mem::scheme::{SchemeConfig, SchemeKind, SchemeParams};
use config::{ExtDramConfig, McdramConfig, MemConfig};

const MB: u64 = 1024 * 1024;

fn build_device(kind: &str, latency: u64, queue_depth: u32) -> Result<DramDevice, FatalError> {
    let config = DeviceConfig {
        latency,
        queue_depth,
        ..DeviceConfig::default()
    };
    match kind {
        "Simple" => Ok(DramDevice::simple(config)),
        "Timed" => Ok(DramDevice::timed(config)),
        other => Err(FatalError::config(format!(
            "invalid memory device type {other}"
        ))),
    }
}

fn addr_config(mcdram: &McdramConfig) -> AddrConfig {
    AddrConfig {
        ch_pos: mcdram.ch_pos,
        ra_pos: mcdram.ra_pos,
        bg_pos: mcdram.bg_pos,
        ba_pos: mcdram.ba_pos,
        ro_pos: mcdram.ro_pos,
        co_pos: mcdram.co_pos,
        ch_mask: mcdram.ch_mask,
        ra_mask: mcdram.ra_mask,
        bg_mask: mcdram.bg_mask,
        ba_mask: mcdram.ba_mask,
        ro_mask: mcdram.ro_mask,
        co_mask: mcdram.co_mask,
        index_mask: mcdram.index_mask(),
    }
}

fn build_pool(
    scheme: SchemeKind,
    mcdram: &McdramConfig,
    ext: &ExtDramConfig,
) -> Result<DramPool, FatalError> {
    let mcdram_count = if scheme == SchemeKind::NoCache {
        0
    } else {
        mcdram.mcdram_per_mc.max(1)
    };
    let mut devices = Vec::with_capacity(mcdram_count as usize);
    for _ in 0..mcdram_count {
        devices.push(build_device(
            &mcdram.device,
            mcdram.latency,
            mcdram.queue_depth,
        )?);
    }
    let ext_dev = build_device(&ext.device, ext.latency, ext.queue_depth)?;
    Ok(DramPool::new(devices, ext_dev))
}

/// Builds one memory controller from the `[mem]` config section.
pub fn build_controller(
    mem: &MemConfig,
    name: &str,
    id: u64,
) -> Result<MemoryController, FatalError> {
    if mem.page_size < 64 || mem.page_size > 4096 || !mem.page_size.is_power_of_two() {
        return Err(FatalError::config(format!(
            "page size {} outside the supported 64-4096 range",
            mem.page_size
        )));
    }
    let kind = SchemeKind::parse(&mem.cache_scheme)?;
    let pagemap = PageMapMode::parse(&mem.pagemap_scheme)?;
    let placement = PagePolicyKind::parse(&mem.placement_policy)?;

    let cfg = SchemeConfig::resolve(
        mem.mcdram.cache_granularity,
        mem.mcdram.num_ways,
        mem.mcdram.size_mb * MB,
        mem.ext_dram.size_mb * MB,
        mem.mcdram.page_size,
        mem.sram_tag,
        mem.llc_latency,
        mem.bw_balance,
        mem.mcdram.mcdram_per_mc,
        mem.mcdram.footprint_size,
    )?;
    let pool = build_pool(kind, &mem.mcdram, &mem.ext_dram)?;

    let params = SchemeParams {
        kind,
        cfg,
        placement,
        tag_buffer_size: mem.mcdram.tag_buffer_size,
        victim_buffer_size: mem.mcdram.victim_buffer_size,
        addr: addr_config(&mem.mcdram),
        controller_id: id,
    };

    let trace_dir = mem.enable_trace.then(|| Path::new(&mem.trace_dir));
    MemoryController::new(
        name,
        id,
        params,
        pagemap,
        pool,
        mem.step_length,
        mem.page_size,
        trace_dir,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds_a_controller() {
        let mem = MemConfig::default();
        let mc = build_controller(&mem, "mem-0", 0).expect("controller");
        assert_eq!(mc.name(), "mem-0");
    }

    #[test]
    fn bad_scheme_name_is_a_config_error() {
        let mem = MemConfig {
            cache_scheme: "TurboCache".to_string(),
            ..MemConfig::default()
        };
        assert!(matches!(
            build_controller(&mem, "mem-0", 0),
            Err(FatalError::Config(_))
        ));
    }

    #[test]
    fn bad_page_size_is_a_config_error() {
        let mem = MemConfig {
            page_size: 8192,
            ..MemConfig::default()
        };
        assert!(matches!(
            build_controller(&mem, "mem-0", 0),
            Err(FatalError::Config(_))
        ));
    }
}
