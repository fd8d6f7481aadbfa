use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::Value;

/// A config section that can be pulled out of the parsed TOML document,
/// falling back to defaults when the section is missing.
pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => {
                warn!("config section not found");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub log_level: String,
    pub num_requests: u64,
    pub seed: u64,
    pub stats_out: Option<String>,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            num_requests: 100_000,
            seed: 1,
            stats_out: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemConfig {
    pub cache_scheme: String,
    pub pagemap_scheme: String,
    pub placement_policy: String,
    pub page_size: u64,
    pub sram_tag: bool,
    pub bw_balance: bool,
    pub llc_latency: u64,
    pub enable_trace: bool,
    pub trace_dir: String,
    /// Accesses between rebalance steps; 0 derives it from the cache size.
    pub step_length: u64,
    pub mcdram: McdramConfig,
    pub ext_dram: ExtDramConfig,
}

impl Config for MemConfig {}

impl Default for MemConfig {
    fn default() -> Self {
        Self {
            cache_scheme: "NoCache".to_string(),
            pagemap_scheme: "Identical".to_string(),
            placement_policy: "LRU".to_string(),
            page_size: 4096,
            sram_tag: false,
            bw_balance: false,
            llc_latency: 20,
            enable_trace: false,
            trace_dir: "./".to_string(),
            step_length: 0,
            mcdram: McdramConfig::default(),
            ext_dram: ExtDramConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct McdramConfig {
    pub size_mb: u64,
    pub cache_granularity: u64,
    pub num_ways: u64,
    pub mcdram_per_mc: u64,
    /// Predicted lines fetched per page fill (Unison).
    pub footprint_size: u64,
    pub tag_buffer_size: u32,
    pub victim_buffer_size: usize,
    /// Page granularity of the hotness oracle.
    pub page_size: u64,
    pub latency: u64,
    pub queue_depth: u32,
    pub device: String,
    pub ch_pos: u32,
    pub ra_pos: u32,
    pub bg_pos: u32,
    pub ba_pos: u32,
    pub ro_pos: u32,
    pub co_pos: u32,
    pub ch_mask: u64,
    pub ra_mask: u64,
    pub bg_mask: u64,
    pub ba_mask: u64,
    pub ro_mask: u64,
    pub co_mask: u64,
    pub index_mask_upper: u32,
    pub index_mask_lower: u32,
}

impl Config for McdramConfig {}

impl Default for McdramConfig {
    fn default() -> Self {
        Self {
            size_mb: 128,
            cache_granularity: 64,
            num_ways: 1,
            mcdram_per_mc: 4,
            footprint_size: 64,
            tag_buffer_size: 1024,
            victim_buffer_size: 8,
            page_size: 4096,
            latency: 50,
            queue_depth: 16,
            device: "Timed".to_string(),
            ch_pos: 12,
            ra_pos: 11,
            bg_pos: 7,
            ba_pos: 9,
            ro_pos: 13,
            co_pos: 0,
            ch_mask: 1,
            ra_mask: 1,
            bg_mask: 3,
            ba_mask: 3,
            ro_mask: 16383,
            co_mask: 127,
            index_mask_upper: 0xFFFF_FFFF,
            index_mask_lower: 0xFFFF_FFFF,
        }
    }
}

impl McdramConfig {
    pub fn index_mask(&self) -> u64 {
        ((self.index_mask_upper as u64) << 32) | self.index_mask_lower as u64
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExtDramConfig {
    /// 0 means unlimited external space.
    pub size_mb: u64,
    pub latency: u64,
    pub queue_depth: u32,
    pub device: String,
}

impl Config for ExtDramConfig {}

impl Default for ExtDramConfig {
    fn default() -> Self {
        Self {
            size_mb: 16384,
            latency: 100,
            queue_depth: 16,
            device: "Timed".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_section_falls_back_to_defaults() {
        let mem = MemConfig::from_section(None);
        assert_eq!(mem.cache_scheme, "NoCache");
        assert_eq!(mem.mcdram.size_mb, 128);
    }

    #[test]
    fn sections_deserialize_with_partial_keys() {
        let doc: Value = toml::from_str(
            r#"
            [mem]
            cache_scheme = "AlloyCache"
            sram_tag = true

            [mem.mcdram]
            size_mb = 64
            num_ways = 1
            "#,
        )
        .unwrap();
        let mem = MemConfig::from_section(doc.get("mem"));
        assert_eq!(mem.cache_scheme, "AlloyCache");
        assert!(mem.sram_tag);
        assert_eq!(mem.mcdram.size_mb, 64);
        // Untouched keys keep their defaults.
        assert_eq!(mem.mcdram.mcdram_per_mc, 4);
        assert_eq!(mem.ext_dram.latency, 100);
    }

    #[test]
    fn index_mask_combines_halves() {
        let cfg = McdramConfig {
            index_mask_upper: 0x1,
            index_mask_lower: 0xF0,
            ..McdramConfig::default()
        };
        assert_eq!(cfg.index_mask(), 0x1_0000_00F0);
    }
}
