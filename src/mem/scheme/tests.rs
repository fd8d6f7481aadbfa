use super::*;
use crate::mem::addr::AddrConfig;
use crate::mem::device::{DeviceConfig, DramDevice, DramPool};
use crate::mem::hash::Lcg48;
use crate::mem::page_map::{PageMapMode, PageMapper};
use crate::mem::placement::PagePolicyKind;
use crate::mem::request::{AccessKind, MemRequest, MesiState};
use crate::sim::build_controller;
use crate::sim::config::MemConfig;

const MB: u64 = 1024 * 1024;

fn simple_pool(mcdram_count: usize) -> DramPool {
    let mc_cfg = DeviceConfig {
        latency: 10,
        burst_cycles: 1,
        ..DeviceConfig::default()
    };
    let ext_cfg = DeviceConfig {
        latency: 40,
        burst_cycles: 1,
        ..DeviceConfig::default()
    };
    DramPool::new(
        (0..mcdram_count)
            .map(|_| DramDevice::simple(mc_cfg))
            .collect(),
        DramDevice::simple(ext_cfg),
    )
}

fn line_cfg(num_sets: u64, num_ways: u64, sram_tag: bool, ext_size: u64) -> SchemeConfig {
    SchemeConfig::resolve(
        64,
        num_ways,
        num_sets * num_ways * 64,
        ext_size,
        4096,
        sram_tag,
        20,
        false,
        1,
        64,
    )
    .expect("scheme config")
}

fn page_cfg(num_sets: u64, num_ways: u64) -> SchemeConfig {
    SchemeConfig::resolve(
        4096,
        num_ways,
        num_sets * num_ways * 4096,
        64 * MB,
        4096,
        false,
        20,
        false,
        1,
        64,
    )
    .expect("scheme config")
}

fn gets(addr: u64, cycle: u64) -> MemRequest {
    MemRequest::new(addr, AccessKind::Gets, cycle)
}

fn putx(addr: u64, cycle: u64) -> MemRequest {
    MemRequest::new(addr, AccessKind::Putx, cycle)
}

fn mem_config_for(scheme: &str) -> MemConfig {
    let mut mem = MemConfig {
        cache_scheme: scheme.to_string(),
        ..MemConfig::default()
    };
    mem.mcdram.size_mb = 1;
    mem.ext_dram.size_mb = 16;
    mem.mcdram.device = "Simple".to_string();
    mem.ext_dram.device = "Simple".to_string();
    match scheme {
        "UnisonCache" | "BansheeCache" => {
            mem.mcdram.cache_granularity = 4096;
            mem.mcdram.num_ways = 4;
        }
        "NDC" => {
            mem.mcdram.num_ways = 2;
            mem.mcdram.mcdram_per_mc = 1;
        }
        "CHAMO" => {
            mem.mcdram.num_ways = 1;
            mem.mcdram.mcdram_per_mc = 1;
        }
        "IdealBalanced" | "IdealAssociative" | "IdealFully" => {
            mem.mcdram.num_ways = 0;
            mem.mcdram.mcdram_per_mc = 1;
        }
        "IdealHotness" => {
            mem.mcdram.mcdram_per_mc = 1;
        }
        _ => {}
    }
    mem
}

fn drive(scheme: &str, num_requests: u64) -> crate::mem::controller::MemoryController {
    let mem = mem_config_for(scheme);
    let mc = build_controller(&mem, "mem-0", 0).expect("controller");
    let mut rng = Lcg48::new(42);
    let ext_lines = mem.ext_dram.size_mb * MB / 64;
    for i in 0..num_requests {
        let addr = rng.next_below(ext_lines / 4);
        let kind = match rng.next_below(10) {
            0..=5 => AccessKind::Gets,
            6..=7 => AccessKind::Getx,
            8 => AccessKind::Putx,
            _ => AccessKind::Puts,
        };
        let mut req = MemRequest::new(addr, kind, i);
        let resp = mc.access(&mut req).expect("access");
        assert!(resp >= i, "{scheme}: response {resp} before request {i}");
    }
    mc
}

const ALL_SCHEMES: &[&str] = &[
    "NoCache",
    "CacheOnly",
    "AlloyCache",
    "UnisonCache",
    "BansheeCache",
    "NDC",
    "CHAMO",
    "IdealBalanced",
    "IdealAssociative",
    "IdealFully",
    "IdealHotness",
];

// ---------------------------------------------------------------- invariants

#[test]
fn response_cycle_never_precedes_request() {
    for scheme in ALL_SCHEMES {
        drive(scheme, 500);
    }
}

#[test]
fn clean_writebacks_are_discarded() {
    let mem = mem_config_for("NoCache");
    let mc = build_controller(&mem, "mem-0", 0).expect("controller");
    let mut req = MemRequest::new(0x123, AccessKind::Puts, 77);
    let resp = mc.access(&mut req).expect("access");
    assert_eq!(resp, 77);
    assert_eq!(req.state, MesiState::I);
    let report = mc.stats_report();
    assert_eq!(report["extDram"]["reads"], 0);
    assert_eq!(report["extDram"]["writes"], 0);
    assert_eq!(mc.num_requests(), 0);
}

#[test]
fn tag_sets_hold_no_duplicates() {
    for scheme in ["AlloyCache", "UnisonCache", "BansheeCache", "NDC", "CHAMO"] {
        let mc = drive(scheme, 2000);
        mc.with_scheme(|s| {
            let tags = s.tag_array();
            for set in 0..tags.num_sets() {
                assert!(tags.set_is_consistent(set), "{scheme}: set {set}");
            }
        });
    }
}

#[test]
fn ds_index_stays_zero_without_bw_balance() {
    for scheme in ALL_SCHEMES {
        let mc = drive(scheme, 2000);
        mc.with_scheme(|s| assert_eq!(s.ds_index(), 0, "{scheme}"));
    }
}

#[test]
fn hit_miss_counters_cover_every_forwarded_request() {
    for scheme in ALL_SCHEMES {
        let mem = mem_config_for(scheme);
        let mc = build_controller(&mem, "mem-0", 0).expect("controller");
        let mut rng = Lcg48::new(7);
        let mut forwarded = 0u64;
        for i in 0..1500u64 {
            let addr = rng.next_below(4096);
            let kind = match rng.next_below(4) {
                0 => AccessKind::Gets,
                1 => AccessKind::Getx,
                2 => AccessKind::Putx,
                _ => AccessKind::Puts,
            };
            if kind != AccessKind::Puts {
                forwarded += 1;
            }
            let mut req = MemRequest::new(addr, kind, i);
            mc.access(&mut req).expect("access");
        }
        mc.with_scheme(|s| {
            assert_eq!(s.stats().accesses(), forwarded, "{scheme}");
        });
    }
}

#[test]
fn getx_leaves_the_line_modified() {
    let mem = mem_config_for("AlloyCache");
    let mc = build_controller(&mem, "mem-0", 0).expect("controller");
    let mut req = MemRequest::new(0x80, AccessKind::Getx, 0);
    mc.access(&mut req).expect("access");
    assert_eq!(req.state, MesiState::M);
    let mut req = gets(0x80, 10);
    req.no_excl = true;
    mc.access(&mut req).expect("access");
    assert_eq!(req.state, MesiState::S);
}

// ----------------------------------------------------------------- scenarios

/// S1: Alloy hit/miss with SRAM tags.
#[test]
fn alloy_hit_miss_sequence() {
    let mut pool = simple_pool(1);
    let mut alloy = AlloyCache::new(line_cfg(4, 1, true, 16 * MB));

    let mut req = gets(0x0, 0);
    alloy.access(&mut req, &mut pool).expect("first access");
    assert_eq!(alloy.stats().load_miss, 1);
    assert_eq!(alloy.stats().placement, 1);

    let mut req = gets(0x0, 100);
    alloy.access(&mut req, &mut pool).expect("second access");
    assert_eq!(alloy.stats().load_hit, 1);

    let mut req = gets(0x40, 200);
    alloy.access(&mut req, &mut pool).expect("third access");
    assert_eq!(alloy.stats().load_miss, 2);

    let way = alloy.tag_array().way(0, 0);
    assert!(way.valid);
    assert_eq!(way.tag, 0x40);
}

/// S2: Banshee tag buffer saturates under a store-miss storm and flushes.
#[test]
fn banshee_tag_buffer_flush_on_store_storm() {
    let mut pool = simple_pool(1);
    let mut banshee = BansheeCache::new(page_cfg(1, 4), PagePolicyKind::Lru, 16);

    for page in 0..20u64 {
        // One store per distinct page; lines are 64 per page.
        let mut req = putx(page * 64, page * 10);
        banshee.access(&mut req, &mut pool).expect("store");
    }
    // A flush fires only when occupancy crossed 0.7 inside an access.
    assert!(banshee.stats().tag_buffer_flush >= 1);
    assert!(banshee.tag_buffer().entry_occupied() <= 16);
}

/// S3: the same storm with SRAM tags still flushes through the remap path.
#[test]
fn banshee_tag_buffer_flush_with_sram_tags() {
    let mut cfg = page_cfg(1, 4);
    cfg.sram_tag = true;
    let mut pool = simple_pool(1);
    let mut banshee = BansheeCache::new(cfg, PagePolicyKind::Lru, 16);

    for page in 0..20u64 {
        let mut req = putx(page * 64, page * 10);
        banshee.access(&mut req, &mut pool).expect("store");
    }
    assert!(banshee.stats().tag_buffer_flush >= 1);
    assert!(banshee.tag_buffer().entry_occupied() <= 16);
}

/// S4: NDC victim buffer saturation falls back to inline write-backs.
#[test]
fn ndc_victim_buffer_saturation() {
    let cfg = line_cfg(4, 1, false, 16 * MB);
    let mut pool = simple_pool(1);
    let mut ndc = NdcCache::new(cfg, AddrConfig::default(), 2, 0).expect("ndc");

    // Bits [6..8) select the set under the default mask; keep them zero so
    // every store lands in set 0.
    for k in 0..8u64 {
        let mut req = putx(k << 8, k * 10);
        ndc.access(&mut req, &mut pool).expect("store");
    }
    assert_eq!(ndc.stats().store_miss, 8);
    assert_eq!(ndc.stats().dirty_evict, 7);
    assert_eq!(ndc.victim_buffer().len(), 2);
}

/// S5: IdealFully LRU order over [A, B, C, D, A, E].
#[test]
fn ideal_fully_lru_order() {
    let cfg = line_cfg(1, 4, false, 4096);
    let mut pool = simple_pool(1);
    let mut ideal = IdealCache::new(cfg, SchemeKind::IdealFully).expect("ideal");

    let (a, b, c, d, e) = (1u64, 2, 3, 4, 5);
    let mut cycle = 0;
    for addr in [a, b, c, d] {
        let mut req = gets(addr, cycle);
        ideal.access(&mut req, &mut pool).expect("fill");
        cycle += 10;
    }
    let tag_order = |ideal: &IdealCache| -> Vec<u64> {
        let ring = ideal.lru_ring().expect("lru ring");
        ring.order()
            .iter()
            .map(|&way| ideal.tag_array().way(0, way).tag)
            .collect()
    };
    assert_eq!(tag_order(&ideal), vec![d, c, b, a]);

    let mut req = gets(a, cycle);
    ideal.access(&mut req, &mut pool).expect("rehit");
    assert_eq!(tag_order(&ideal), vec![a, d, c, b]);

    let mut req = gets(e, cycle + 10);
    ideal.access(&mut req, &mut pool).expect("evicting miss");
    assert!(ideal.tag_array().find(0, b).is_none(), "B must be evicted");
    assert!(ideal.tag_array().find(0, e).is_some());
}

/// S6: Johnny page mapping is deterministic and first-touch ordered.
#[test]
fn johnny_page_mapper_determinism() {
    let mut mapper = PageMapper::new(PageMapMode::Johnny, 64 * MB, 4096, 0);
    // Virtual lines 0x0, 0x40 and byte 0x1000 (line 0x40... given as line
    // addresses): vpns 0, 1, 64, 0, 8192.
    let lines = [0x0u64, 0x40, 0x1000, 0x0, 0x80000];
    let phys: Vec<u64> = lines
        .iter()
        .map(|&l| mapper.map_line(l).expect("map"))
        .collect();
    assert_eq!(phys[0] / 64, 0, "vpn 0 -> phys page 0");
    assert_eq!(phys[1] / 64, 1, "vpn 1 -> phys page 1");
    assert_eq!(phys[3], phys[0], "re-access reuses the mapping");
    assert_eq!(mapper.mapped_pages(), 4);
    // Injectivity across the distinct pages.
    let mut pages: Vec<u64> = phys.iter().map(|p| p / 64).collect();
    pages.sort_unstable();
    pages.dedup();
    assert_eq!(pages.len(), 4);
}

// ------------------------------------------------------- behaviour specifics

#[test]
fn cacheonly_never_touches_the_external_dram() {
    let mc = drive("CacheOnly", 500);
    let report = mc.stats_report();
    assert_eq!(report["extDram"]["reads"], 0);
    assert_eq!(report["extDram"]["writes"], 0);
}

#[test]
fn nocache_never_touches_mcdram() {
    let mc = drive("NoCache", 500);
    let report = mc.stats_report();
    assert!(report["mcdram"].as_array().unwrap().is_empty());
}

#[test]
fn unison_counts_touch_and_evict_lines() {
    let mem = mem_config_for("UnisonCache");
    let mc = build_controller(&mem, "mem-0", 0).expect("controller");
    // Two pages per set pressure so evictions happen: cache has
    // 1 MB / 4 ways / 4096 = 64 sets; pages p and p + 256 collide.
    for i in 0..4096u64 {
        let page = i % 512;
        let mut req = putx(page * 64, i);
        mc.access(&mut req).expect("access");
    }
    mc.with_scheme(|s| {
        let stats = s.stats();
        assert!(stats.dirty_evict > 0);
        assert!(stats.total_touch_lines > 0);
        assert!(stats.total_evict_lines > 0);
        assert!(stats.tag_load >= stats.accesses());
    });
}

#[test]
fn chamo_reports_cuckoo_metrics() {
    let mc = drive("CHAMO", 1000);
    let report = mc.stats_report();
    let extra = &report["scheme"]["extra"];
    assert!(extra["touched"].as_u64().unwrap() > 0);
    assert!(extra["periodAccesses"].as_u64().unwrap() > 0);
}

#[test]
fn ideal_hotness_prefers_hot_pages() {
    let cfg = SchemeConfig::resolve(64, 1, 2 * 4096, 64 * MB, 4096, false, 20, false, 1, 64)
        .expect("cfg");
    let mut pool = simple_pool(1);
    let mut hotness = IdealHotness::new(cfg).expect("hotness");

    // Two resident pages; page 0 is hot, page 1 is cold.
    for i in 0..10u64 {
        let mut req = gets(0, i);
        hotness.access(&mut req, &mut pool).expect("hot page");
    }
    let mut req = gets(64, 100);
    hotness.access(&mut req, &mut pool).expect("cold page");
    // A third page must displace the cold one, not the hot one.
    let mut req = gets(128, 200);
    hotness.access(&mut req, &mut pool).expect("new page");
    let mut req = gets(0, 300);
    hotness.access(&mut req, &mut pool).expect("hot page stays");
    assert_eq!(hotness.stats().load_hit, 10);
    let mut req = gets(64, 400);
    hotness.access(&mut req, &mut pool).expect("cold page gone");
    assert_eq!(hotness.stats().load_miss, 4, "cold page was displaced");
}

#[test]
fn bandwidth_balance_raises_ds_index_under_mc_pressure() {
    let mut cfg = line_cfg(4000, 1, true, 16 * MB);
    cfg.bw_balance = true;
    let mut pool = simple_pool(1);
    let mut alloy = AlloyCache::new(cfg);

    // All hits: MC-DRAM bandwidth dominates, ratio 1.0 > target.
    for i in 0..64u64 {
        let mut req = gets(i % 8, i);
        alloy.access(&mut req, &mut pool).expect("access");
    }
    let mut req = gets(0, 1000);
    alloy.period(&mut req, &mut pool).expect("period");
    assert!(alloy.ds_index() > 0, "ds_index must grow under MC pressure");
    assert!(alloy.ds_index() <= 4000);
}

#[test]
fn bandwidth_window_decays_each_period() {
    let mut pool = simple_pool(1);
    let mut alloy = AlloyCache::new(line_cfg(16, 1, true, 16 * MB));
    for i in 0..10u64 {
        let mut req = gets(i, i);
        alloy.access(&mut req, &mut pool).expect("access");
    }
    let before = alloy.core().window.ext_bw;
    let mut req = gets(0, 100);
    alloy.period(&mut req, &mut pool).expect("period");
    assert_eq!(alloy.core().window.ext_bw, before / 2);
}
