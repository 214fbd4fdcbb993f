use std::fmt;

use thiserror::Error;

use crate::addr::AddressDecoder;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("number of lines per set (-E) must be at least 1")]
    ZeroAssociativity,
    #[error("set index bits ({s}) and block offset bits ({b}) exceed the 64-bit address")]
    AddressBitsExceeded { s: u32, b: u32 },
    #[error("2^{s} sets of {lines} lines cannot be addressed on this platform")]
    TooManyLines { s: u32, lines: usize },
}

/// Geometry of a set-associative cache: `2^s` sets of `E` lines, each line
/// holding a `2^b` byte block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    set_index_bits: u32,
    lines_per_set: usize,
    block_offset_bits: u32,
}

impl CacheConfig {
    pub fn new(s: u32, e: usize, b: u32) -> Result<Self, ConfigError> {
        if e == 0 {
            return Err(ConfigError::ZeroAssociativity);
        }
        if s >= u64::BITS || b > u64::BITS - s {
            return Err(ConfigError::AddressBitsExceeded { s, b });
        }
        1usize
            .checked_shl(s)
            .and_then(|sets| sets.checked_mul(e))
            .ok_or(ConfigError::TooManyLines { s, lines: e })?;
        Ok(Self {
            set_index_bits: s,
            lines_per_set: e,
            block_offset_bits: b,
        })
    }
    pub fn set_index_bits(&self) -> u32 {
        self.set_index_bits
    }
    pub fn lines_per_set(&self) -> usize {
        self.lines_per_set
    }
    pub fn block_offset_bits(&self) -> u32 {
        self.block_offset_bits
    }
    pub fn tag_bits(&self) -> u32 {
        u64::BITS - self.set_index_bits - self.block_offset_bits
    }
    pub fn num_sets(&self) -> usize {
        1 << self.set_index_bits
    }
    /// `2^b`, saturating for a block that spans the whole address space.
    pub fn block_size(&self) -> u64 {
        1u64.checked_shl(self.block_offset_bits).unwrap_or(u64::MAX)
    }
    pub fn capacity_bytes(&self) -> u128 {
        self.num_sets() as u128 * self.lines_per_set as u128 * (1u128 << self.block_offset_bits)
    }
    pub fn decoder(&self) -> AddressDecoder {
        AddressDecoder::new(self.set_index_bits, self.block_offset_bits)
    }
}

impl fmt::Display for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "s={} E={} b={} ({} sets, {}-way, {} byte blocks)",
            self.set_index_bits,
            self.lines_per_set,
            self.block_offset_bits,
            self.num_sets(),
            self.lines_per_set,
            self.block_size()
        )
    }
}
