//! Per-file key derivation and recovery
//!
//! A file's key is the file-key hash of its bare name (the directory part is
//! ignored). Files flagged with an adjusted key additionally mix in their
//! block offset and size, so the same name stored twice gets two keys.

use crate::cipher::KeyStream;
use crate::error::{CryptoError, CryptoResult};
use crate::hash::{HashPurpose, hash_string};
use crate::table::{CIPHER_REGION, crypt_table};

/// Final component of an archive path
///
/// Both separators are accepted.
pub fn file_name_component(path: &str) -> &str {
    path.rfind(['\\', '/'])
        .map_or(path, |separator| &path[separator + 1..])
}

/// Derive the encryption key of a stored file
///
/// With `adjusted` set the key becomes `(key + block_offset) ^ file_size`.
///
/// ```
/// use mpqkit_crypto::key::file_key;
///
/// let plain = file_key("war3map.j", false, 0x1000, 512);
/// assert_eq!(plain, file_key("scripts\\war3map.j", false, 0, 0));
/// assert_eq!(
///     file_key("war3map.j", true, 0x1000, 512),
///     plain.wrapping_add(0x1000) ^ 512
/// );
/// ```
pub fn file_key(path: &str, adjusted: bool, block_offset: u32, file_size: u32) -> u32 {
    let key = hash_string(file_name_component(path), HashPurpose::FileKey);
    if adjusted {
        adjust_key(key, block_offset, file_size)
    } else {
        key
    }
}

/// Apply the offset/size adjustment to a base key
pub const fn adjust_key(key: u32, block_offset: u32, file_size: u32) -> u32 {
    key.wrapping_add(block_offset) ^ file_size
}

/// Recover a file key from the start of an encrypted sector-offset table
///
/// The table is encrypted with `file_key - 1` and its first plaintext word is
/// always the table length in bytes. Given that value, only 256 keys can
/// produce the first ciphertext word; the second word (the end of the first
/// sector) must not exceed `first_plain + max_sector_span`.
///
/// Returns the file key, i.e. the table key plus one.
pub fn detect_file_key(
    encrypted: &[u32],
    first_plain: u32,
    max_sector_span: u32,
) -> CryptoResult<u32> {
    let [first, second, ..] = encrypted else {
        return Err(CryptoError::InsufficientData {
            needed: 2,
            actual: encrypted.len(),
        });
    };

    let table = crypt_table();
    let second_limit = first_plain.wrapping_add(max_sector_span);
    // key + seed, where seed = SEED_INIT + table[CIPHER_REGION + (key & 0xFF)]
    let key_plus_seed = (first ^ first_plain).wrapping_sub(crate::cipher::SEED_INIT);

    for low_byte in 0..0x100 {
        let candidate = key_plus_seed.wrapping_sub(table[CIPHER_REGION + low_byte]);
        if (candidate & 0xFF) as usize != low_byte {
            continue;
        }

        let mut stream = KeyStream::new(candidate);
        if stream.decrypt_word(*first) != first_plain {
            continue;
        }
        if stream.decrypt_word(*second) <= second_limit {
            return Ok(candidate.wrapping_add(1));
        }
    }

    Err(CryptoError::KeyNotFound {
        expected: first_plain,
    })
}
