//! Storm block cipher
//!
//! A keyed XOR stream over little-endian 32-bit words. Every word is XORed
//! with `key + seed`; afterwards the key is rotated through a fixed recurrence
//! and the seed absorbs the *plaintext* word. Because the plaintext drives the
//! seed, encryption and decryption are the same keyed pass that only differ in
//! which side of the XOR feeds the seed.
//!
//! Trailing bytes that do not fill a whole word are left untouched.
//!
//! ```
//! use mpqkit_crypto::cipher::{decrypt_block, encrypt_block};
//!
//! let mut data = b"sector payload!!".to_vec();
//! encrypt_block(&mut data, 0x1234_5678);
//! assert_ne!(&data, b"sector payload!!");
//! decrypt_block(&mut data, 0x1234_5678);
//! assert_eq!(&data, b"sector payload!!");
//! ```

use crate::table::{CIPHER_REGION, crypt_table};

/// Initial value of the rolling seed
pub const SEED_INIT: u32 = 0xEEEE_EEEE;

/// Which side of the XOR is the plaintext
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Input is plaintext, output is ciphertext
    Encrypt,
    /// Input is ciphertext, output is plaintext
    Decrypt,
}

/// Rolling cipher state
///
/// Consumes one word at a time, which lets callers decrypt a table whose
/// length is only known once its last word has been decrypted.
#[derive(Debug, Clone)]
pub struct KeyStream {
    key: u32,
    seed: u32,
}

impl KeyStream {
    /// Start a stream with the given key
    pub const fn new(key: u32) -> Self {
        Self {
            key,
            seed: SEED_INIT,
        }
    }

    /// Current key (advances after every word)
    pub const fn key(&self) -> u32 {
        self.key
    }

    /// Decrypt the next word
    pub fn decrypt_word(&mut self, word: u32) -> u32 {
        self.apply(word, Direction::Decrypt)
    }

    /// Encrypt the next word
    pub fn encrypt_word(&mut self, word: u32) -> u32 {
        self.apply(word, Direction::Encrypt)
    }

    /// Transform the next word in the given direction
    pub fn apply(&mut self, word: u32, direction: Direction) -> u32 {
        let table = crypt_table();
        self.seed = self
            .seed
            .wrapping_add(table[CIPHER_REGION + (self.key & 0xFF) as usize]);

        let output = word ^ self.key.wrapping_add(self.seed);
        let plain = match direction {
            Direction::Encrypt => word,
            Direction::Decrypt => output,
        };

        self.key = ((!self.key) << 21).wrapping_add(0x1111_1111) | (self.key >> 11);
        self.seed = plain
            .wrapping_add(self.seed)
            .wrapping_add(self.seed << 5)
            .wrapping_add(3);

        output
    }
}

/// Transform a byte buffer in place
///
/// Only whole words are transformed; a 1-3 byte tail passes through.
pub fn transform(data: &mut [u8], key: u32, direction: Direction) {
    let mut stream = KeyStream::new(key);
    for chunk in data.chunks_exact_mut(4) {
        let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let output = stream.apply(word, direction);
        chunk.copy_from_slice(&output.to_le_bytes());
    }
}

/// Encrypt a byte buffer in place
pub fn encrypt_block(data: &mut [u8], key: u32) {
    transform(data, key, Direction::Encrypt);
}

/// Decrypt a byte buffer in place
pub fn decrypt_block(data: &mut [u8], key: u32) {
    transform(data, key, Direction::Decrypt);
}

/// Decrypt a slice of words in place
pub fn decrypt_words(words: &mut [u32], key: u32) {
    let mut stream = KeyStream::new(key);
    for word in words {
        *word = stream.decrypt_word(*word);
    }
}

/// Encrypt a slice of words in place
pub fn encrypt_words(words: &mut [u32], key: u32) {
    let mut stream = KeyStream::new(key);
    for word in words {
        *word = stream.encrypt_word(*word);
    }
}
