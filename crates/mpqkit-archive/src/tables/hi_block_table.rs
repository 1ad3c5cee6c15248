//! Hi-block table
//!
//! Upper 16 offset bits for every block, stored unencrypted after the other
//! tables in archives that can exceed 4 GiB.

use crate::error::{ArchiveError, ArchiveResult};
use crate::header::merge_high_bits;

/// Parsed hi-block table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HiBlockTable {
    high_bits: Vec<u16>,
}

impl HiBlockTable {
    /// Wrap already-parsed values
    pub fn new(high_bits: Vec<u16>) -> Self {
        Self { high_bits }
    }

    /// Parse `entry_count` little-endian values
    pub fn parse(data: &[u8], entry_count: usize) -> ArchiveResult<Self> {
        if data.len() != entry_count * 2 {
            return Err(ArchiveError::table(
                "hi-block table",
                format!("expected {} bytes, got {}", entry_count * 2, data.len()),
            ));
        }
        let high_bits = data
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self { high_bits })
    }

    /// Serialize the table
    pub fn to_bytes(&self) -> Vec<u8> {
        self.high_bits.iter().flat_map(|value| value.to_le_bytes()).collect()
    }

    /// High bits of block `index` (0 past the end)
    pub fn get(&self, index: usize) -> u16 {
        self.high_bits.get(index).copied().unwrap_or(0)
    }

    /// Full offset of block `index` given its low 32 bits
    pub fn resolve(&self, index: usize, low: u32) -> u64 {
        merge_high_bits(low, self.get(index))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.high_bits.len()
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.high_bits.is_empty()
    }
}
