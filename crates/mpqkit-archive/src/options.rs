//! Settings applied when opening an archive

use crate::tables::LOCALE_NEUTRAL;

/// Default cap on a single file's declared size (1 GiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

/// Default number of bytes scanned for the archive header (512 MiB)
pub const DEFAULT_HEADER_SEARCH_LIMIT: u64 = 512 * 1024 * 1024;

/// Options controlling how an archive is opened and read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    /// Check per-sector Adler-32 values of blocks that carry them
    pub verify_sector_checksums: bool,

    /// Check the MD5 digests stored in version 3 headers
    pub verify_table_digests: bool,

    /// Refuse files whose declared or stored size exceeds this many bytes
    pub max_file_size: u64,

    /// How far into the stream to look for the header
    pub header_search_limit: u64,

    /// Preferred locale for lookups
    pub locale: u16,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            verify_sector_checksums: true,
            verify_table_digests: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            header_search_limit: DEFAULT_HEADER_SEARCH_LIMIT,
            locale: LOCALE_NEUTRAL,
        }
    }
}

impl OpenOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Create options from environment variables
    ///
    /// Reads `MPQKIT_VERIFY_SECTOR_CHECKSUMS`, `MPQKIT_VERIFY_TABLE_DIGESTS`,
    /// `MPQKIT_MAX_FILE_SIZE`, `MPQKIT_HEADER_SEARCH_LIMIT` and
    /// `MPQKIT_LOCALE`. Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            verify_sector_checksums: lookup("MPQKIT_VERIFY_SECTOR_CHECKSUMS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.verify_sector_checksums),
            verify_table_digests: lookup("MPQKIT_VERIFY_TABLE_DIGESTS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.verify_table_digests),
            max_file_size: lookup("MPQKIT_MAX_FILE_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_file_size),
            header_search_limit: lookup("MPQKIT_HEADER_SEARCH_LIMIT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.header_search_limit),
            locale: lookup("MPQKIT_LOCALE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.locale),
        }
    }

    /// Set whether sector checksums are verified
    #[must_use]
    pub fn verify_sector_checksums(mut self, verify: bool) -> Self {
        self.verify_sector_checksums = verify;
        self
    }

    /// Set whether header digests are verified
    #[must_use]
    pub fn verify_table_digests(mut self, verify: bool) -> Self {
        self.verify_table_digests = verify;
        self
    }

    /// Set the file size limit
    #[must_use]
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Set the header search limit
    #[must_use]
    pub fn header_search_limit(mut self, bytes: u64) -> Self {
        self.header_search_limit = bytes;
        self
    }

    /// Set the preferred locale
    #[must_use]
    pub fn locale(mut self, locale: u16) -> Self {
        self.locale = locale;
        self
    }
}
