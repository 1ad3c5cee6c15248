//! Hash table
//!
//! An open-addressing table keyed by two independent hashes of a file path.
//! Lookups start at the path's home slot and scan forward, wrapping at the
//! end of the table, until they reach a slot that was never used.
//!
//! Deleted files leave a tombstone behind: the slot keeps the path hashes, so
//! collision chains running through it stay intact and a lookup can tell a deleted
//! file apart from one that never existed.

use binrw::{BinRead, BinWrite};
use mpqkit_crypto::{HASH_TABLE_KEY, PathHashes, decrypt_block, encrypt_block};
use std::io::Cursor;
use tracing::warn;

use super::block_table::BlockTable;
use crate::error::{ArchiveError, ArchiveResult};

/// Size of one hash-table record in bytes
pub const HASH_ENTRY_SIZE: usize = 16;

/// Block index of a slot that was never used
pub const BLOCK_INDEX_FREE: u32 = 0xFFFF_FFFF;

/// Block index of a slot whose file was deleted
pub const BLOCK_INDEX_DELETED: u32 = 0xFFFF_FFFE;

/// Locale of files that are not language specific
pub const LOCALE_NEUTRAL: u16 = 0;

/// Hash-table record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BinRead, BinWrite)]
#[brw(little)]
pub struct HashEntry {
    /// First path verification hash
    pub name_a: u32,
    /// Second path verification hash
    pub name_b: u32,
    /// Locale identifier
    pub locale: u16,
    /// Platform identifier
    pub platform: u8,
    /// Unused
    pub reserved: u8,
    /// Index into the block table, or one of the sentinels
    pub block_index: u32,
}

impl HashEntry {
    /// A slot that was never used
    pub const fn free() -> Self {
        Self {
            name_a: 0xFFFF_FFFF,
            name_b: 0xFFFF_FFFF,
            locale: 0xFFFF,
            platform: 0xFF,
            reserved: 0xFF,
            block_index: BLOCK_INDEX_FREE,
        }
    }

    /// A slot for `hashes` pointing at `block_index`
    pub const fn new(hashes: &PathHashes, locale: u16, block_index: u32) -> Self {
        Self {
            name_a: hashes.name_a,
            name_b: hashes.name_b,
            locale,
            platform: 0,
            reserved: 0,
            block_index,
        }
    }

    /// Whether the slot was never used
    pub const fn is_free(&self) -> bool {
        self.block_index == BLOCK_INDEX_FREE
    }

    /// Whether the slot is a tombstone
    pub const fn is_deleted(&self) -> bool {
        self.block_index == BLOCK_INDEX_DELETED
    }

    /// Whether both verification hashes match
    pub const fn matches(&self, hashes: &PathHashes) -> bool {
        self.name_a == hashes.name_a && self.name_b == hashes.name_b
    }
}

impl Default for HashEntry {
    fn default() -> Self {
        Self::free()
    }
}

/// A matched slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashSlot {
    /// Position in the hash table
    pub index: usize,
    /// The slot's contents
    pub entry: HashEntry,
}

/// Outcome of a path lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLookup {
    /// A live file
    Found(HashSlot),
    /// The path was stored but has been deleted
    Deleted(HashSlot),
    /// The path was never stored
    Absent,
}

impl FileLookup {
    /// Whether a live file was found
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// Whether only a deleted entry was found
    pub const fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted(_))
    }

    /// Whether the path never existed
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// The live slot, if any
    pub const fn found(&self) -> Option<&HashSlot> {
        match self {
            Self::Found(slot) => Some(slot),
            _ => None,
        }
    }
}

/// Decrypted hash table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashTable {
    entries: Vec<HashEntry>,
}

impl HashTable {
    /// Table of `size` free slots
    pub fn with_size(size: usize) -> Self {
        Self {
            entries: vec![HashEntry::free(); size],
        }
    }

    /// Wrap already-parsed entries
    pub fn new(entries: Vec<HashEntry>) -> Self {
        Self { entries }
    }

    /// Decrypt and parse the table as stored in the archive
    pub fn from_encrypted(data: &[u8]) -> ArchiveResult<Self> {
        let mut plain = data.to_vec();
        decrypt_block(&mut plain, HASH_TABLE_KEY);
        Self::parse(&plain)
    }

    /// Parse decrypted table bytes
    pub fn parse(data: &[u8]) -> ArchiveResult<Self> {
        if data.len() % HASH_ENTRY_SIZE != 0 {
            return Err(ArchiveError::table(
                "hash table",
                format!("length {} is not a multiple of {HASH_ENTRY_SIZE}", data.len()),
            ));
        }

        let mut cursor = Cursor::new(data);
        let entries = (0..data.len() / HASH_ENTRY_SIZE)
            .map(|_| HashEntry::read(&mut cursor))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    /// Serialize and encrypt the table
    pub fn to_encrypted_bytes(&self) -> ArchiveResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(self.entries.len() * HASH_ENTRY_SIZE));
        for entry in &self.entries {
            entry.write(&mut cursor)?;
        }
        let mut data = cursor.into_inner();
        encrypt_block(&mut data, HASH_TABLE_KEY);
        Ok(data)
    }

    /// Look up a path
    ///
    /// Among live matches the entry in `locale` wins, then the neutral
    /// locale, then the first one scanned. A match whose block is gone only
    /// counts when no live match exists.
    pub fn find_entry(&self, path: &str, locale: u16, blocks: &BlockTable) -> FileLookup {
        self.find_hashes(&PathHashes::new(path), locale, blocks)
    }

    /// Look up precomputed path hashes
    pub fn find_hashes(&self, hashes: &PathHashes, locale: u16, blocks: &BlockTable) -> FileLookup {
        let count = self.entries.len();
        if count == 0 {
            return FileLookup::Absent;
        }

        let home = hashes.home_index(count);
        let mut live: Option<(u8, HashSlot)> = None;
        let mut tombstone: Option<HashSlot> = None;

        // One full lap at most: a table without free slots must still terminate
        for step in 0..count {
            let index = (home + step) % count;
            let entry = self.entries[index];

            if entry.is_free() {
                break;
            }
            if !entry.matches(hashes) {
                continue;
            }

            let slot = HashSlot { index, entry };
            if !is_live(&entry, blocks) {
                tombstone.get_or_insert(slot);
                continue;
            }

            let rank = if entry.locale == locale {
                0
            } else if entry.locale == LOCALE_NEUTRAL {
                1
            } else {
                2
            };
            if rank == 0 {
                return FileLookup::Found(slot);
            }
            if live.is_none_or(|(best, _)| rank < best) {
                live = Some((rank, slot));
            }
        }

        match (live, tombstone) {
            (Some((_, slot)), _) => FileLookup::Found(slot),
            (None, Some(slot)) => FileLookup::Deleted(slot),
            (None, None) => FileLookup::Absent,
        }
    }

    /// Store `hashes` in the first never-used slot of its collision chain
    ///
    /// Returns the slot index.
    pub fn insert(
        &mut self,
        hashes: &PathHashes,
        locale: u16,
        block_index: u32,
    ) -> ArchiveResult<usize> {
        let count = self.entries.len();
        let home = hashes.home_index(count);
        let index = (0..count)
            .map(|step| (home + step) % count)
            .find(|&index| self.entries[index].is_free())
            .ok_or_else(|| {
                ArchiveError::InvalidInput(format!("hash table of {count} slots is full"))
            })?;

        self.entries[index] = HashEntry::new(hashes, locale, block_index);
        Ok(index)
    }

    /// Turn the slot at `index` into a tombstone
    pub fn mark_deleted(&mut self, index: usize) -> ArchiveResult<()> {
        let count = self.entries.len();
        let entry = self
            .entries
            .get_mut(index)
            .ok_or_else(|| {
                ArchiveError::InvalidInput(format!("slot {index} outside table of {count}"))
            })?;
        entry.block_index = BLOCK_INDEX_DELETED;
        Ok(())
    }

    /// Entry at `index`
    pub fn get(&self, index: usize) -> Option<&HashEntry> {
        self.entries.get(index)
    }

    /// All slots in table order
    pub fn entries(&self) -> &[HashEntry] {
        &self.entries
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no slots
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_live(entry: &HashEntry, blocks: &BlockTable) -> bool {
    if entry.is_deleted() {
        return false;
    }
    match blocks.get(entry.block_index as usize) {
        Some(block) => block.exists(),
        None => {
            warn!(
                "hash entry {:08x}:{:08x} points past the block table ({} >= {})",
                entry.name_a,
                entry.name_b,
                entry.block_index,
                blocks.len()
            );
            false
        }
    }
}
