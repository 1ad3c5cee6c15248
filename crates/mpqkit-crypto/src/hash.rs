//! Storm string hash
//!
//! One hash function serves four purposes, selected by which 256-word region
//! of the key-schedule table the characters index into. Hashing is
//! case-insensitive and treats `/` and `\` as the same path separator.

use crate::table::crypt_table;
use std::fmt;

/// Decryption key of the hash table, `hash_string("(hash table)", FileKey)`
pub const HASH_TABLE_KEY: u32 = 0xC3AF_3770;

/// Decryption key of the block table, `hash_string("(block table)", FileKey)`
pub const BLOCK_TABLE_KEY: u32 = 0xEC83_B3A3;

const HASH_SEED_1: u32 = 0x7FED_7FED;
const HASH_SEED_2: u32 = 0xEEEE_EEEE;

/// Selects the table region a hash is computed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum HashPurpose {
    /// Home slot of a path in the hash table
    TableSlot = 0,
    /// First path verification hash
    PathA = 1,
    /// Second path verification hash
    PathB = 2,
    /// Encryption key of a file or table
    FileKey = 3,
}

impl HashPurpose {
    /// Offset of this purpose's region in the key-schedule table
    pub const fn table_offset(self) -> usize {
        (self as usize) << 8
    }
}

impl fmt::Display for HashPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TableSlot => "table-slot",
            Self::PathA => "path-a",
            Self::PathB => "path-b",
            Self::FileKey => "file-key",
        };
        f.write_str(name)
    }
}

/// Hash a string for the given purpose
///
/// # Examples
///
/// ```
/// use mpqkit_crypto::hash::{hash_string, HashPurpose, HASH_TABLE_KEY};
///
/// assert_eq!(hash_string("(hash table)", HashPurpose::FileKey), HASH_TABLE_KEY);
/// assert_eq!(
///     hash_string("units\\human\\footman.mdx", HashPurpose::PathA),
///     hash_string("Units/Human/Footman.mdx", HashPurpose::PathA),
/// );
/// ```
pub fn hash_string(text: &str, purpose: HashPurpose) -> u32 {
    hash_bytes(text.as_bytes(), purpose)
}

/// Hash raw bytes for the given purpose
///
/// Bytes outside the ASCII range are hashed as-is.
pub fn hash_bytes(bytes: &[u8], purpose: HashPurpose) -> u32 {
    let table = crypt_table();
    let region = purpose.table_offset();
    let mut seed1 = HASH_SEED_1;
    let mut seed2 = HASH_SEED_2;

    for &byte in bytes {
        let ch = normalize(byte);
        let value = u32::from(ch);

        seed1 = table[region + usize::from(ch)] ^ seed1.wrapping_add(seed2);
        seed2 = value
            .wrapping_add(seed1)
            .wrapping_add(seed2)
            .wrapping_add(seed2 << 5)
            .wrapping_add(3);
    }

    seed1
}

const fn normalize(byte: u8) -> u8 {
    match byte {
        b'/' => b'\\',
        _ => byte.to_ascii_uppercase(),
    }
}

/// The three hashes that locate and verify a path in the hash table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathHashes {
    /// Home slot hash (before reduction modulo the table size)
    pub slot: u32,
    /// First verification hash
    pub name_a: u32,
    /// Second verification hash
    pub name_b: u32,
}

impl PathHashes {
    /// Compute all three hashes for a path
    pub fn new(path: &str) -> Self {
        Self {
            slot: hash_string(path, HashPurpose::TableSlot),
            name_a: hash_string(path, HashPurpose::PathA),
            name_b: hash_string(path, HashPurpose::PathB),
        }
    }

    /// Home slot index for a table of `entry_count` entries
    pub fn home_index(&self, entry_count: usize) -> usize {
        if entry_count == 0 {
            return 0;
        }
        self.slot as usize % entry_count
    }
}

impl fmt::Display for PathHashes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}:{:08x}:{:08x}",
            self.slot, self.name_a, self.name_b
        )
    }
}
