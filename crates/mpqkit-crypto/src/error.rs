//! Error types for cipher operations

use thiserror::Error;

/// Errors that can occur during cipher operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Not enough ciphertext to recover a key
    #[error("key detection needs at least {needed} encrypted words, got {actual}")]
    InsufficientData {
        /// Number of 32-bit words required
        needed: usize,
        /// Number of 32-bit words supplied
        actual: usize,
    },

    /// No candidate key reproduced the expected plaintext
    #[error("no file key matches expected plaintext 0x{expected:08X}")]
    KeyNotFound {
        /// The plaintext value the first word should decrypt to
        expected: u32,
    },
}

/// Result type for cipher operations
pub type CryptoResult<T> = Result<T, CryptoError>;
