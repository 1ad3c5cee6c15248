//! Reader and writer for MPQ archives
//!
#![allow(clippy::cast_possible_truncation)] // Intentional for binary format parsing
#![allow(clippy::cast_possible_wrap)] // Intentional for binary operations
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::similar_names)] // Domain-specific naming patterns
#![allow(clippy::return_self_not_must_use)] // Builder patterns
#![allow(clippy::missing_errors_doc)]
//! An archive is a header, a block of file data and two encrypted lookup
//! tables. The hash table maps a path to a block index; the block table
//! describes where each file's bytes are and how they are stored (sectored or
//! single unit, compressed, encrypted).
//!
//! # Components
//!
//! - **Header**: header location (including user-data preambles) and the four
//!   header layouts
//! - **Tables**: hash table with tombstones and locale preference, block
//!   table, hi-block table for 48-bit offsets
//! - **Extraction**: sector-offset tables, sector decryption, the codec chain
//!   and sector checksums
//! - **Builder**: writes archives that the reader round-trips
//!
//! # Examples
//!
//! ```
//! use mpqkit_archive::{Archive, ArchiveBuilder, FileOptions, compression::CompressionMask};
//! use std::io::Cursor;
//!
//! let bytes = ArchiveBuilder::new()
//!     .add_file("readme.txt", b"hello".to_vec())
//!     .add_file_with_options(
//!         "war3map.j",
//!         b"function main takes nothing returns nothing".repeat(20),
//!         FileOptions::new()
//!             .compression(CompressionMask::DEFLATE)
//!             .encrypted(true),
//!     )
//!     .build()?;
//!
//! let mut archive = Archive::open(Cursor::new(bytes))?;
//! assert_eq!(archive.extract_file("readme.txt")?, Some(b"hello".to_vec()));
//! assert_eq!(archive.extract_file("missing.txt")?, None);
//! # Ok::<(), mpqkit_archive::ArchiveError>(())
//! ```

#![warn(missing_docs)]

pub mod archive;
pub mod builder;
pub mod compression;
pub mod error;
pub mod extract;
pub mod header;
pub mod listfile;
pub mod options;
pub mod sector;
/// Hash, block and hi-block tables
pub mod tables;

pub use archive::{Archive, ArchiveTables, SignatureStatus};
pub use builder::{ArchiveBuilder, FileOptions};
pub use error::{ArchiveError, ArchiveResult};
pub use header::{FormatVersion, Header, LocatedHeader, UserDataHeader, locate_header};
pub use options::OpenOptions;
pub use tables::{BlockEntry, BlockFlags, BlockTable, FileLookup, HashEntry, HashTable};
