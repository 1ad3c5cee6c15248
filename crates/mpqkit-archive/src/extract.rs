//! Extraction pipeline
//!
//! Turns the stored bytes of one block into the original file: split into
//! sectors, decrypt, decompress, verify checksums and concatenate.

use mpqkit_crypto::decrypt_block;
use std::fmt;
use tracing::{debug, trace};

use crate::compression::{self, UnitCodec};
use crate::error::{ArchiveError, ArchiveResult};
use crate::sector::{self, SectorOffsets};
use crate::tables::BlockEntry;

/// How a block's bytes are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Zero-length file
    Empty,
    /// One unit, decrypted and decompressed as a whole
    SingleUnit,
    /// Sector-offset table followed by compressed sectors
    CompressedSectors,
    /// Fixed-size sectors stored as-is
    PlainSectors,
}

impl StorageMode {
    /// Storage mode of a block
    pub fn of(block: &BlockEntry) -> Self {
        if block.file_size == 0 {
            Self::Empty
        } else if block.is_single_unit() {
            Self::SingleUnit
        } else if block.is_compressed() {
            Self::CompressedSectors
        } else {
            Self::PlainSectors
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::SingleUnit => "single unit",
            Self::CompressedSectors => "compressed sectors",
            Self::PlainSectors => "plain sectors",
        };
        f.write_str(name)
    }
}

/// Codec used for a block's compressed units
pub fn unit_codec(block: &BlockEntry) -> UnitCodec {
    if block.is_imploded() {
        UnitCodec::Imploded
    } else {
        UnitCodec::Chained
    }
}

/// Everything needed to rebuild one file from its stored bytes
#[derive(Debug, Clone, Copy)]
pub struct BlockReader<'a> {
    /// The block's stored bytes
    pub blob: &'a [u8],
    /// The block record
    pub block: &'a BlockEntry,
    /// File key, for encrypted blocks
    pub key: Option<u32>,
    /// Archive sector size
    pub sector_size: u32,
    /// Whether stored sector checksums are checked
    pub verify_checksums: bool,
}

impl BlockReader<'_> {
    /// Rebuild the file
    ///
    /// Fails rather than returning a buffer whose length differs from the
    /// block's file size.
    pub fn extract(&self) -> ArchiveResult<Vec<u8>> {
        let mode = StorageMode::of(self.block);
        debug!(
            "extracting {} bytes from {} stored bytes as {mode}{}",
            self.block.file_size,
            self.blob.len(),
            if self.key.is_some() { ", encrypted" } else { "" }
        );

        let data = match mode {
            StorageMode::Empty => Vec::new(),
            StorageMode::SingleUnit => self.single_unit()?,
            StorageMode::CompressedSectors => self.compressed_sectors()?,
            StorageMode::PlainSectors => self.plain_sectors()?,
        };

        if data.len() != self.block.file_size as usize {
            return Err(ArchiveError::SizeMismatch {
                expected: u64::from(self.block.file_size),
                actual: data.len() as u64,
            });
        }
        Ok(data)
    }

    fn single_unit(&self) -> ArchiveResult<Vec<u8>> {
        let mut data = self.blob.to_vec();
        if let Some(key) = self.key {
            decrypt_block(&mut data, key);
        }
        if self.block.is_compressed() {
            data = compression::decompress(
                &data,
                self.block.file_size as usize,
                unit_codec(self.block),
            )?;
        }
        Ok(data)
    }

    fn compressed_sectors(&self) -> ArchiveResult<Vec<u8>> {
        let file_size = self.block.file_size as usize;
        let sector_size = self.sector_size as usize;
        let count = sector::sector_count(self.block.file_size, self.sector_size);
        let codec = unit_codec(self.block);

        let offsets =
            SectorOffsets::read(self.blob, count, self.key.map(|key| key.wrapping_sub(1)))?;
        let checksums = if self.verify_checksums && self.block.has_sector_checksums() {
            sector::load_checksums(self.blob, &offsets, self.key, codec)?
        } else {
            None
        };

        let mut output = Vec::with_capacity(file_size);
        for index in 0..count {
            let expected = sector_size.min(file_size - index * sector_size);
            let mut data = self.blob[offsets.sector_range(index)].to_vec();
            if let Some(key) = self.key {
                decrypt_block(&mut data, key.wrapping_add(index as u32));
            }
            if data.len() < expected {
                data = compression::decompress(&data, expected, codec)?;
            }
            trace!("sector {index}: {} bytes", data.len());

            if let Some(checksums) = &checksums {
                checksums.verify(index, &data)?;
            }
            output.extend_from_slice(&data);
        }
        Ok(output)
    }

    fn plain_sectors(&self) -> ArchiveResult<Vec<u8>> {
        let file_size = self.block.file_size as usize;
        if self.blob.len() < file_size {
            return Err(ArchiveError::SizeMismatch {
                expected: u64::from(self.block.file_size),
                actual: self.blob.len() as u64,
            });
        }

        let mut output = self.blob[..file_size].to_vec();
        if let Some(key) = self.key {
            for (index, sector) in output.chunks_mut(self.sector_size as usize).enumerate() {
                decrypt_block(sector, key.wrapping_add(index as u32));
            }
        }
        Ok(output)
    }
}
