//! Block table
//!
//! One 16-byte record per stored file: where its data lives, how large it is
//! before and after compression, and how it is stored.

use binrw::{BinRead, BinWrite};
use mpqkit_crypto::{BLOCK_TABLE_KEY, decrypt_block, encrypt_block};
use std::io::Cursor;

use crate::error::{ArchiveError, ArchiveResult};

/// Size of one block-table record in bytes
pub const BLOCK_ENTRY_SIZE: usize = 16;

/// Storage flags of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct BlockFlags(pub u32);

impl BlockFlags {
    /// Compressed with the single legacy implode codec, no selector byte
    pub const IMPLODE: u32 = 0x0000_0100;
    /// Compressed with a codec chain, one selector byte per compressed unit
    pub const COMPRESS: u32 = 0x0000_0200;
    /// Sectors are encrypted
    pub const ENCRYPTED: u32 = 0x0001_0000;
    /// File key is adjusted by block offset and file size
    pub const FIX_KEY: u32 = 0x0002_0000;
    /// Block holds a patch rather than file data
    pub const PATCH_FILE: u32 = 0x0010_0000;
    /// Stored as one unit instead of sectors
    pub const SINGLE_UNIT: u32 = 0x0100_0000;
    /// Deletion marker
    pub const DELETE_MARKER: u32 = 0x0200_0000;
    /// Sector-offset table carries a checksum table
    pub const SECTOR_CRC: u32 = 0x0400_0000;
    /// Block holds a file
    pub const EXISTS: u32 = 0x8000_0000;

    /// Either compression flag
    pub const COMPRESSION_MASK: u32 = Self::IMPLODE | Self::COMPRESS;

    /// Wrap raw flag bits
    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw flag bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `flag` is set
    pub const fn has(self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    /// Whether any bit of `mask` is set
    pub const fn any(self, mask: u32) -> bool {
        self.0 & mask != 0
    }

    /// Copy with `flag` set
    #[must_use]
    pub const fn with(self, flag: u32) -> Self {
        Self(self.0 | flag)
    }

    /// Copy with `flag` cleared
    #[must_use]
    pub const fn without(self, flag: u32) -> Self {
        Self(self.0 & !flag)
    }
}

/// Block-table record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct BlockEntry {
    /// Offset of the data relative to the archive header (low 32 bits)
    pub offset: u32,
    /// Bytes occupied in the archive
    pub stored_size: u32,
    /// Size of the original file
    pub file_size: u32,
    /// Storage flags
    pub flags: BlockFlags,
}

impl BlockEntry {
    /// Whether the data must be decompressed
    ///
    /// A compression flag on a block whose stored size equals its file size
    /// means compression did not help and the bytes are stored as-is.
    pub fn is_compressed(&self) -> bool {
        self.has_compression_flag() && self.stored_size != self.file_size
    }

    /// Whether either compression flag is set
    pub fn has_compression_flag(&self) -> bool {
        self.flags.any(BlockFlags::COMPRESSION_MASK)
    }

    /// Legacy single-codec compression without a selector byte
    pub fn is_imploded(&self) -> bool {
        self.flags.has(BlockFlags::IMPLODE)
    }

    /// Whether the data is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.flags.has(BlockFlags::ENCRYPTED)
    }

    /// Whether the file key is offset/size adjusted
    pub fn has_adjusted_key(&self) -> bool {
        self.flags.has(BlockFlags::FIX_KEY)
    }

    /// Whether the data is stored as one unit
    pub fn is_single_unit(&self) -> bool {
        self.flags.has(BlockFlags::SINGLE_UNIT)
    }

    /// Whether the data is split into sectors
    pub fn has_sectors(&self) -> bool {
        !self.is_single_unit()
    }

    /// Whether the sector table carries per-sector checksums
    pub fn has_sector_checksums(&self) -> bool {
        self.flags.has(BlockFlags::SECTOR_CRC)
    }

    /// Whether the block holds a patch
    pub fn is_patch_file(&self) -> bool {
        self.flags.has(BlockFlags::PATCH_FILE)
    }

    /// Whether the block holds a live file
    pub fn exists(&self) -> bool {
        self.flags.has(BlockFlags::EXISTS) && !self.flags.has(BlockFlags::DELETE_MARKER)
    }

    /// Whether the block is unused or marks a deletion
    pub fn is_deleted(&self) -> bool {
        !self.exists()
    }
}

/// Decrypted block table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockTable {
    entries: Vec<BlockEntry>,
}

impl BlockTable {
    /// Wrap already-parsed entries
    pub fn new(entries: Vec<BlockEntry>) -> Self {
        Self { entries }
    }

    /// Decrypt and parse the table as stored in the archive
    pub fn from_encrypted(data: &[u8]) -> ArchiveResult<Self> {
        let mut plain = data.to_vec();
        decrypt_block(&mut plain, BLOCK_TABLE_KEY);
        Self::parse(&plain)
    }

    /// Parse decrypted table bytes
    pub fn parse(data: &[u8]) -> ArchiveResult<Self> {
        if data.len() % BLOCK_ENTRY_SIZE != 0 {
            return Err(ArchiveError::table(
                "block table",
                format!("length {} is not a multiple of {BLOCK_ENTRY_SIZE}", data.len()),
            ));
        }

        let mut cursor = Cursor::new(data);
        let entries = (0..data.len() / BLOCK_ENTRY_SIZE)
            .map(|_| BlockEntry::read(&mut cursor))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    /// Serialize and encrypt the table
    pub fn to_encrypted_bytes(&self) -> ArchiveResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(self.entries.len() * BLOCK_ENTRY_SIZE));
        for entry in &self.entries {
            entry.write(&mut cursor)?;
        }
        let mut data = cursor.into_inner();
        encrypt_block(&mut data, BLOCK_TABLE_KEY);
        Ok(data)
    }

    /// Entry at `index`
    pub fn get(&self, index: usize) -> Option<&BlockEntry> {
        self.entries.get(index)
    }

    /// All entries in table order
    pub fn entries(&self) -> &[BlockEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry and return its index
    pub(crate) fn push(&mut self, entry: BlockEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entry(stored_size: u32, file_size: u32, flags: u32) -> BlockEntry {
        BlockEntry {
            offset: 0x20,
            stored_size,
            file_size,
            flags: BlockFlags::new(flags),
        }
    }

    #[test]
    fn test_flagged_but_not_shrunk_is_uncompressed() {
        let shrunk = entry(80, 100, BlockFlags::EXISTS | BlockFlags::COMPRESS);
        let same = entry(100, 100, BlockFlags::EXISTS | BlockFlags::COMPRESS);
        let imploded = entry(60, 100, BlockFlags::EXISTS | BlockFlags::IMPLODE);

        assert!(shrunk.is_compressed());
        assert!(!same.is_compressed());
        assert!(same.has_compression_flag());
        assert!(imploded.is_compressed());
        assert!(imploded.is_imploded());
    }

    #[test]
    fn test_predicates() {
        let block = entry(
            10,
            10,
            BlockFlags::EXISTS
                | BlockFlags::ENCRYPTED
                | BlockFlags::FIX_KEY
                | BlockFlags::SINGLE_UNIT,
        );
        assert!(block.exists());
        assert!(block.is_encrypted());
        assert!(block.has_adjusted_key());
        assert!(block.is_single_unit());
        assert!(!block.has_sectors());
        assert!(!block.has_sector_checksums());
        assert!(!block.is_patch_file());
    }

    #[test]
    fn test_deleted_blocks() {
        assert!(entry(0, 0, 0).is_deleted());
        assert!(entry(0, 0, BlockFlags::EXISTS | BlockFlags::DELETE_MARKER).is_deleted());
        assert!(!entry(0, 0, BlockFlags::EXISTS).is_deleted());
    }

    #[test]
    fn test_flag_helpers() {
        let flags = BlockFlags::default()
            .with(BlockFlags::EXISTS)
            .with(BlockFlags::COMPRESS);
        assert!(flags.has(BlockFlags::EXISTS | BlockFlags::COMPRESS));
        assert!(!flags.has(BlockFlags::COMPRESSION_MASK));
        assert!(flags.any(BlockFlags::COMPRESSION_MASK));
        assert_eq!(flags.without(BlockFlags::COMPRESS).bits(), BlockFlags::EXISTS);
    }

    #[test]
    fn test_encrypted_round_trip() {
        let table = BlockTable::new(vec![
            entry(100, 200, BlockFlags::EXISTS | BlockFlags::COMPRESS),
            entry(5, 5, BlockFlags::EXISTS),
        ]);
        let bytes = table.to_encrypted_bytes().expect("serialize");
        assert_eq!(bytes.len(), 32);
        assert_ne!(&bytes[4..8], &100u32.to_le_bytes());

        let parsed = BlockTable::from_encrypted(&bytes).expect("parse");
        assert_eq!(parsed, table);
        assert_eq!(parsed.get(1).map(|b| b.file_size), Some(5));
        assert!(parsed.get(2).is_none());
    }

    #[test]
    fn test_rejects_partial_entry() {
        let err = BlockTable::parse(&[0u8; 20]).unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::InvalidTable {
                table: "block table",
                ..
            }
        ));
    }
}
