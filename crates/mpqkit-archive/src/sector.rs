//! Sector-offset tables and sector checksums
//!
//! A compressed, sectored file starts with a table of `u32` offsets relative
//! to the start of the file data. Entry `i` is where sector `i` starts and the
//! entry after the last sector is where the sector data ends. Files flagged
//! with sector checksums carry one more entry; the range between the last two
//! entries holds the checksum table.
//!
//! The table's length is not stored anywhere. It is read word by word (and
//! decrypted with `file_key - 1` when the file is encrypted) until an entry
//! equals the stored size of the block.

use mpqkit_crypto::KeyStream;
use std::ops::Range;
use tracing::{trace, warn};

use crate::compression::{self, UnitCodec};
use crate::error::{ArchiveError, ArchiveResult};

/// Number of sectors needed for `file_size` bytes
pub fn sector_count(file_size: u32, sector_size: u32) -> usize {
    file_size.div_ceil(sector_size.max(1)) as usize
}

/// Validated sector-offset table of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorOffsets {
    offsets: Vec<u32>,
    sector_count: usize,
}

impl SectorOffsets {
    /// Read the table at the start of a block's stored bytes
    ///
    /// `table_key` is the file key minus one for encrypted files. Every entry
    /// must be strictly greater than the previous one and no larger than the
    /// stored size; anything else is reported as a corrupt table rather than
    /// returning a partial file.
    pub fn read(blob: &[u8], sector_count: usize, table_key: Option<u32>) -> ArchiveResult<Self> {
        let stored_size = u32::try_from(blob.len()).map_err(|_| {
            ArchiveError::CorruptSectorTable(format!("stored size {} exceeds 32 bits", blob.len()))
        })?;
        let max_entries = sector_count + 2;

        let mut stream = table_key.map(KeyStream::new);
        let mut offsets: Vec<u32> = Vec::with_capacity(max_entries);

        for word in blob.chunks_exact(4) {
            let raw = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            let offset = match stream.as_mut() {
                Some(stream) => stream.decrypt_word(raw),
                None => raw,
            };

            if offset > stored_size {
                return Err(ArchiveError::CorruptSectorTable(format!(
                    "entry {} is {offset:#x}, beyond the stored size {stored_size:#x}",
                    offsets.len()
                )));
            }
            if let Some(&previous) = offsets.last()
                && offset <= previous
            {
                return Err(ArchiveError::CorruptSectorTable(format!(
                    "entry {} is {offset:#x}, not after the previous entry {previous:#x}",
                    offsets.len()
                )));
            }

            offsets.push(offset);
            if offset == stored_size {
                break;
            }
            if offsets.len() == max_entries {
                return Err(ArchiveError::CorruptSectorTable(format!(
                    "{max_entries} entries without reaching the stored size {stored_size:#x}"
                )));
            }
        }

        if offsets.last() != Some(&stored_size) {
            return Err(ArchiveError::CorruptSectorTable(format!(
                "table runs past the end of {stored_size} stored bytes"
            )));
        }
        if offsets.len() < sector_count + 1 {
            return Err(ArchiveError::CorruptSectorTable(format!(
                "{} entries for {sector_count} sectors",
                offsets.len()
            )));
        }

        let table_size = offsets.len() * 4;
        if (offsets[0] as usize) < table_size {
            return Err(ArchiveError::CorruptSectorTable(format!(
                "first sector at {:#x} overlaps the {table_size}-byte table",
                offsets[0]
            )));
        }

        trace!(
            "sector table: {} entries for {sector_count} sectors",
            offsets.len()
        );
        Ok(Self {
            offsets,
            sector_count,
        })
    }

    /// Raw offsets in table order
    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    /// Number of data sectors
    pub fn sector_count(&self) -> usize {
        self.sector_count
    }

    /// Byte range of sector `index` within the stored bytes
    pub fn sector_range(&self, index: usize) -> Range<usize> {
        self.offsets[index] as usize..self.offsets[index + 1] as usize
    }

    /// Byte range of the checksum table, if the table has the extra entry
    pub fn checksum_range(&self) -> Option<Range<usize>> {
        let n = self.sector_count;
        (self.offsets.len() == n + 2)
            .then(|| self.offsets[n] as usize..self.offsets[n + 1] as usize)
    }
}

/// Build an encrypted or plain sector-offset table
pub fn encode_offsets(offsets: &[u32], table_key: Option<u32>) -> Vec<u8> {
    let mut stream = table_key.map(KeyStream::new);
    offsets
        .iter()
        .flat_map(|&offset| {
            let word = match stream.as_mut() {
                Some(stream) => stream.encrypt_word(offset),
                None => offset,
            };
            word.to_le_bytes()
        })
        .collect()
}

/// Per-sector Adler-32 values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectorChecksums {
    values: Vec<u32>,
}

impl SectorChecksums {
    /// Decode the checksum table of a file
    ///
    /// The table is decrypted with `checksum_key` (file key plus sector count)
    /// and decompressed with the file's codec when shorter than one value per
    /// sector.
    pub fn decode(
        data: &[u8],
        sector_count: usize,
        checksum_key: Option<u32>,
        codec: UnitCodec,
    ) -> ArchiveResult<Self> {
        let expected = sector_count * 4;
        let mut table = data.to_vec();
        if let Some(key) = checksum_key {
            mpqkit_crypto::decrypt_block(&mut table, key);
        }
        if table.len() < expected {
            table = compression::decompress(&table, expected, codec)?;
        }
        if table.len() < expected {
            return Err(ArchiveError::CorruptSectorTable(format!(
                "checksum table holds {} bytes for {sector_count} sectors",
                table.len()
            )));
        }

        let values = table[..expected]
            .chunks_exact(4)
            .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect();
        Ok(Self { values })
    }

    /// Compute checksums for decompressed sectors
    pub fn compute<'a>(sectors: impl IntoIterator<Item = &'a [u8]>) -> Self {
        Self {
            values: sectors.into_iter().map(adler::adler32_slice).collect(),
        }
    }

    /// Stored value for sector `index`
    pub fn get(&self, index: usize) -> Option<u32> {
        self.values.get(index).copied()
    }

    /// Serialize as little-endian words
    pub fn to_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|value| value.to_le_bytes()).collect()
    }

    /// Check a decompressed sector; a stored value of 0 is not checked
    pub fn verify(&self, index: usize, sector: &[u8]) -> ArchiveResult<()> {
        let expected = match self.get(index) {
            Some(0) | None => return Ok(()),
            Some(value) => value,
        };
        let actual = adler::adler32_slice(sector);
        if actual != expected {
            return Err(ArchiveError::SectorChecksumMismatch {
                sector: index,
                expected,
                actual,
            });
        }
        Ok(())
    }
}

/// Load the checksum table of a file whose block carries the checksum flag
///
/// Returns `None` and logs a warning when the sector table has no room for
/// one.
pub fn load_checksums(
    blob: &[u8],
    offsets: &SectorOffsets,
    file_key: Option<u32>,
    codec: UnitCodec,
) -> ArchiveResult<Option<SectorChecksums>> {
    let Some(range) = offsets.checksum_range() else {
        warn!(
            "block is flagged with sector checksums but its table has only {} entries",
            offsets.offsets().len()
        );
        return Ok(None);
    };
    let count = offsets.sector_count();
    let key = file_key.map(|key| key.wrapping_add(count as u32));
    SectorChecksums::decode(&blob[range], count, key, codec).map(Some)
}
