//! Storm cipher primitives for MPQ archives
//!
//! This crate provides the keyed hashing and block cipher shared by every part
//! of an MPQ archive: table encryption, file encryption and hash-table lookup.
//!
//! # Components
//!
//! - **Key schedule**: the 1280-word table every other primitive indexes into
//! - **Hashing**: case-insensitive path hashes for slot lookup, verification
//!   and key derivation
//! - **Cipher**: the rolling XOR stream applied to tables, sectors and
//!   sector-offset tables
//! - **File keys**: per-file key derivation and recovery from known plaintext
//!
//! # Examples
//!
//! ## Locating a path in the hash table
//!
//! ```
//! use mpqkit_crypto::PathHashes;
//!
//! let hashes = PathHashes::new("(listfile)");
//! assert_eq!(hashes.home_index(16), 0x5F3D_E859 % 16);
//! ```
//!
//! ## Decrypting a stored file
//!
//! ```
//! use mpqkit_crypto::{decrypt_block, encrypt_block, file_key};
//!
//! let key = file_key("scripts\\war3map.j", true, 0x200, 12);
//! let mut sector = b"function x()".to_vec();
//! encrypt_block(&mut sector, key);
//! decrypt_block(&mut sector, key);
//! assert_eq!(&sector, b"function x()");
//! ```

#![warn(missing_docs)]

pub mod cipher;
pub mod error;
pub mod hash;
pub mod key;
pub mod table;

pub use error::{CryptoError, CryptoResult};

// Re-export commonly used items
pub use cipher::{
    Direction, KeyStream, decrypt_block, decrypt_words, encrypt_block, encrypt_words,
};
pub use hash::{BLOCK_TABLE_KEY, HASH_TABLE_KEY, HashPurpose, PathHashes, hash_string};
pub use key::{detect_file_key, file_key, file_name_component};
pub use table::crypt_table;
