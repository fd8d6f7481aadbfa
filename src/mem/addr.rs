use crate::mem::error::FatalError;

/// Decoded DRAM coordinates of one line address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DramAddr {
    pub channel: u32,
    pub rank: u32,
    pub bankgroup: u32,
    pub bank: u32,
    pub row: u32,
    pub column: u32,
}

/// Bit positions and masks for each DRAM coordinate, plus the cache index
/// mask. `index_mask == u64::MAX` selects the default mask (lowest
/// `log2(num_sets)` bits); any other value must carry exactly that many
/// bits.
#[derive(Debug, Clone, Copy)]
pub struct AddrConfig {
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
    pub index_mask: u64,
}

impl Default for AddrConfig {
    fn default() -> Self {
        Self {
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
            index_mask: u64::MAX,
        }
    }
}

/// Bit-slices line addresses into DRAM coordinates and into cache
/// `(set, tag)` pairs under a configurable index mask.
#[derive(Debug, Clone)]
pub struct AddressCodec {
    cfg: AddrConfig,
    num_sets: u64,
    index_mask: u64,
    shift_bits: u32,
}

/// Address bits considered for tag extraction, after the line-offset bits.
const MAX_ADDR_BITS: u32 = 58;

impl AddressCodec {
    pub fn new(cfg: AddrConfig, num_sets: u64) -> Result<Self, FatalError> {
        let set_bits = num_sets.max(1).next_power_of_two().trailing_zeros();
        let index_mask = if cfg.index_mask == u64::MAX {
            (1u64 << set_bits) - 1
        } else {
            if cfg.index_mask.count_ones() != set_bits {
                return Err(FatalError::config(format!(
                    "index mask {:#x} has {} bits set, cache needs {} index bits",
                    cfg.index_mask,
                    cfg.index_mask.count_ones(),
                    set_bits
                )));
            }
            cfg.index_mask
        };
        Ok(Self {
            cfg,
            num_sets: num_sets.max(1),
            index_mask,
            shift_bits: 6,
        })
    }

    pub fn map(&self, line_addr: u64) -> DramAddr {
        let hex = line_addr >> self.shift_bits;
        DramAddr {
            channel: ((hex >> self.cfg.ch_pos) & self.cfg.ch_mask) as u32,
            rank: ((hex >> self.cfg.ra_pos) & self.cfg.ra_mask) as u32,
            bankgroup: ((hex >> self.cfg.bg_pos) & self.cfg.bg_mask) as u32,
            bank: ((hex >> self.cfg.ba_pos) & self.cfg.ba_mask) as u32,
            row: ((hex >> self.cfg.ro_pos) & self.cfg.ro_mask) as u32,
            column: ((hex >> self.cfg.co_pos) & self.cfg.co_mask) as u32,
        }
    }

    /// Extracts and compacts the index-mask bits of `line_addr`.
    pub fn set_of(&self, line_addr: u64) -> u64 {
        let hex = line_addr >> self.shift_bits;
        let mut index = 0u64;
        let mut mask = self.index_mask;
        let mut bit_pos = 0u32;
        let mut index_pos = 0u32;
        while mask != 0 {
            if mask & 1 != 0 {
                if hex & (1u64 << bit_pos) != 0 {
                    index |= 1u64 << index_pos;
                }
                index_pos += 1;
            }
            mask >>= 1;
            bit_pos += 1;
        }
        index % self.num_sets
    }

    /// Concatenates every non-index bit below `MAX_ADDR_BITS`.
    pub fn tag_of(&self, line_addr: u64) -> u64 {
        let hex = line_addr >> self.shift_bits;
        let mut tag = 0u64;
        let mut tag_pos = 0u32;
        for bit_pos in 0..MAX_ADDR_BITS {
            if self.index_mask & (1u64 << bit_pos) == 0 {
                if hex & (1u64 << bit_pos) != 0 {
                    tag |= 1u64 << tag_pos;
                }
                tag_pos += 1;
            }
        }
        tag
    }

    /// Inverse of `set_of`/`tag_of`: scatter the set bits into the index
    /// positions and the tag bits into the rest.
    pub fn compose(&self, set: u64, tag: u64) -> u64 {
        let mut hex = 0u64;
        let mut set_pos = 0u32;
        let mut tag_pos = 0u32;
        for bit_pos in 0..MAX_ADDR_BITS {
            if self.index_mask & (1u64 << bit_pos) != 0 {
                if set & (1u64 << set_pos) != 0 {
                    hex |= 1u64 << bit_pos;
                }
                set_pos += 1;
            } else {
                if tag & (1u64 << tag_pos) != 0 {
                    hex |= 1u64 << bit_pos;
                }
                tag_pos += 1;
            }
        }
        hex << self.shift_bits
    }
}

pub fn page_of_line(line_addr: u64, lines_per_page: u64) -> u64 {
    line_addr / lines_per_page
}

pub fn line_of_page(page: u64, lines_per_page: u64) -> u64 {
    page * lines_per_page
}
