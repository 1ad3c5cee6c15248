//! Error types for archive operations

use mpqkit_crypto::CryptoError;
use thiserror::Error;

/// Archive operation result type
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Errors raised while opening, reading or building an archive
///
/// Missing or deleted files are not errors; lookups report them through
/// [`FileLookup`](crate::tables::FileLookup) and extraction returns `None`.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// No archive header within the searched range
    #[error("no archive header found in the first {searched} bytes")]
    HeaderNotFound {
        /// Number of bytes scanned
        searched: u64,
    },

    /// Invalid archive magic bytes
    #[error("invalid archive magic: expected [4D 50 51 1A], got {0:02X?}")]
    InvalidMagic([u8; 4]),

    /// Format version this reader does not know
    #[error("unsupported format version: {0}")]
    UnsupportedFormatVersion(u16),

    /// Header fields are inconsistent
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Hash, block or hi-block table could not be loaded
    #[error("invalid {table}: {reason}")]
    InvalidTable {
        /// Which table failed
        table: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// Sector-offset table is not monotonic, out of bounds or truncated
    #[error("corrupt sector table: {0}")]
    CorruptSectorTable(String),

    /// A decompressed sector does not match its stored Adler-32
    #[error("sector {sector} checksum mismatch: expected 0x{expected:08X}, got 0x{actual:08X}")]
    SectorChecksumMismatch {
        /// Sector index within the file
        sector: usize,
        /// Stored checksum
        expected: u32,
        /// Checksum of the decompressed sector
        actual: u32,
    },

    /// A table's MD5 does not match the digest stored in the header
    #[error("{table} digest mismatch: expected {expected:02x?}, got {actual:02x?}")]
    TableDigestMismatch {
        /// Which table failed
        table: &'static str,
        /// Digest stored in the header
        expected: [u8; 16],
        /// Digest of the bytes on disk
        actual: [u8; 16],
    },

    /// Reconstructed data has the wrong length
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Size recorded in the block table
        expected: u64,
        /// Size actually produced
        actual: u64,
    },

    /// Block declares a size above the configured limit
    #[error("file of {size} bytes exceeds the limit of {limit} bytes")]
    FileTooLarge {
        /// Declared size
        size: u64,
        /// Configured limit
        limit: u64,
    },

    /// Block index outside the block table
    #[error("block index {index} out of range ({count} blocks)")]
    BlockIndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of blocks in the table
        count: usize,
    },

    /// A codec failed to decode its input
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// A codec failed to encode its input
    #[error("compression failed: {0}")]
    Compression(String),

    /// Builder input that cannot be written
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Recognized but unimplemented feature
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Key detection failed
    #[error("cipher error: {0}")]
    Crypto(#[from] CryptoError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary parsing error
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

impl ArchiveError {
    /// Whether the error means the archive bytes are damaged or inconsistent
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            Self::CorruptSectorTable(_)
                | Self::SectorChecksumMismatch { .. }
                | Self::TableDigestMismatch { .. }
                | Self::SizeMismatch { .. }
                | Self::Decompression(_)
        )
    }

    pub(crate) fn table(table: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidTable {
            table,
            reason: reason.into(),
        }
    }
}
