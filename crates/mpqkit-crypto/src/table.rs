//! Storm key-schedule table
//!
//! The cipher, the path hash and the key-detection routine all index into the
//! same 1280-word table. It is derived from a fixed seed with a
//! linear-congruential generator, so it is built once on first use and shared
//! read-only for the rest of the process.

use std::sync::OnceLock;

/// Number of 32-bit words in the key-schedule table
pub const CRYPT_TABLE_SIZE: usize = 0x500;

/// Offset of the 256-word region mixed into the cipher's rolling seed
pub const CIPHER_REGION: usize = 0x400;

/// Generator seed
const TABLE_SEED: u32 = 0x0010_0001;

/// Generator modulus
const TABLE_MODULUS: u32 = 0x002A_AAAB;

static CRYPT_TABLE: OnceLock<[u32; CRYPT_TABLE_SIZE]> = OnceLock::new();

/// Shared key-schedule table, built on first access
pub fn crypt_table() -> &'static [u32; CRYPT_TABLE_SIZE] {
    CRYPT_TABLE.get_or_init(build_table)
}

/// Build the key-schedule table
///
/// Each of the first 256 indices seeds five words, spaced 256 apart. Every
/// word takes two generator steps: the first supplies the high half and the
/// second the low half.
pub fn build_table() -> [u32; CRYPT_TABLE_SIZE] {
    let mut table = [0u32; CRYPT_TABLE_SIZE];
    let mut seed = TABLE_SEED;

    for column in 0..0x100 {
        let mut index = column;
        for _ in 0..5 {
            seed = next_seed(seed);
            let high = (seed & 0xFFFF) << 16;
            seed = next_seed(seed);
            let low = seed & 0xFFFF;

            table[index] = high | low;
            index += 0x100;
        }
    }

    table
}

// Intermediate product stays below 2^32: seed < 0x2AAAAB, so seed * 125 + 3 < 0x5355_5540
const fn next_seed(seed: u32) -> u32 {
    (seed * 125 + 3) % TABLE_MODULUS
}
