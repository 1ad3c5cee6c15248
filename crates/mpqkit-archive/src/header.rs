//! Archive header
//!
//! The header comes in four sizes. Every format version appends one fixed
//! group of fields to the previous version's layout, so parsing walks the
//! versions in order and reads exactly one group per step. Fields of a later
//! version are `None` on an earlier-version header and are never read.
//!
//! A header may be preceded by arbitrary data. It always starts on a 512-byte
//! boundary, optionally behind a user-data block that points at it.

use binrw::{BinRead, BinWrite};
use std::fmt;
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::{debug, trace};

use crate::error::{ArchiveError, ArchiveResult};

/// Header magic, `MPQ\x1A`
pub const MPQ_MAGIC: [u8; 4] = *b"MPQ\x1A";

/// User-data block magic, `MPQ\x1B`
pub const USER_DATA_MAGIC: [u8; 4] = *b"MPQ\x1B";

/// Headers and user-data blocks start on multiples of this
pub const HEADER_ALIGNMENT: u64 = 0x200;

/// Sector size for a shift of zero
pub const SECTOR_SIZE_BASE: u32 = 0x200;

/// Largest sector-size shift that still fits a 32-bit sector size
pub const MAX_SECTOR_SIZE_SHIFT: u16 = 22;

/// Extended offsets are 48 bits wide
pub const OFFSET_MASK_48: u64 = 0xFFFF_FFFF_FFFF;

/// Bytes of the header covered by its own MD5
pub const HEADER_DIGEST_SPAN: usize = 0xC0;

/// Header layout generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum FormatVersion {
    /// 32-byte header with 32-bit offsets
    Basic = 0,
    /// Adds the hi-block table and 16-bit offset extensions
    ExtendedV1 = 1,
    /// Adds a 64-bit archive size and HET/BET table offsets
    ExtendedV2 = 2,
    /// Adds table sizes and MD5 digests
    ExtendedV3 = 3,
}

impl FormatVersion {
    /// Parse the raw version field
    pub fn from_raw(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Basic),
            1 => Some(Self::ExtendedV1),
            2 => Some(Self::ExtendedV2),
            3 => Some(Self::ExtendedV3),
            _ => None,
        }
    }

    /// Raw version field
    pub const fn as_raw(self) -> u16 {
        self as u16
    }

    /// Size of a header of this version in bytes
    pub const fn header_size(self) -> u32 {
        match self {
            Self::Basic => 0x20,
            Self::ExtendedV1 => 0x2C,
            Self::ExtendedV2 => 0x44,
            Self::ExtendedV3 => 0xD0,
        }
    }

    /// The version whose field group follows this one's
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Basic => Some(Self::ExtendedV1),
            Self::ExtendedV1 => Some(Self::ExtendedV2),
            Self::ExtendedV2 => Some(Self::ExtendedV3),
            Self::ExtendedV3 => None,
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Basic => "basic",
            Self::ExtendedV1 => "extended-v1",
            Self::ExtendedV2 => "extended-v2",
            Self::ExtendedV3 => "extended-v3",
        };
        write!(f, "{name} (v{})", self.as_raw())
    }
}

/// Fields shared by every version, after the magic
#[derive(Debug, Clone, Copy, BinRead, BinWrite)]
#[brw(little)]
struct BasicFields {
    header_size: u32,
    archive_size: u32,
    format_version: u16,
    sector_size_shift: u16,
    hash_table_offset: u32,
    block_table_offset: u32,
    hash_table_entries: u32,
    block_table_entries: u32,
}

/// Fields added by [`FormatVersion::ExtendedV1`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct ExtendedV1Fields {
    /// Offset of the hi-block table, 0 when absent
    pub hi_block_table_offset: u64,
    /// Upper 16 bits of the hash-table offset
    pub hash_table_offset_high: u16,
    /// Upper 16 bits of the block-table offset
    pub block_table_offset_high: u16,
}

/// Fields added by [`FormatVersion::ExtendedV2`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct ExtendedV2Fields {
    /// 64-bit archive size
    pub archive_size: u64,
    /// Offset of the BET table (not used by this reader)
    pub bet_table_offset: u64,
    /// Offset of the HET table (not used by this reader)
    pub het_table_offset: u64,
}

/// Fields added by [`FormatVersion::ExtendedV3`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct ExtendedV3Fields {
    /// Stored size of the hash table
    pub hash_table_size: u64,
    /// Stored size of the block table
    pub block_table_size: u64,
    /// Stored size of the hi-block table
    pub hi_block_table_size: u64,
    /// Stored size of the HET table
    pub het_table_size: u64,
    /// Stored size of the BET table
    pub bet_table_size: u64,
    /// Chunk size for raw-data MD5s
    pub raw_chunk_size: u32,
    /// MD5 of the block table as stored
    pub block_table_md5: [u8; 16],
    /// MD5 of the hash table as stored
    pub hash_table_md5: [u8; 16],
    /// MD5 of the hi-block table as stored
    pub hi_block_table_md5: [u8; 16],
    /// MD5 of the BET table as stored
    pub bet_table_md5: [u8; 16],
    /// MD5 of the HET table as stored
    pub het_table_md5: [u8; 16],
    /// MD5 of the first 0xC0 header bytes
    pub header_md5: [u8; 16],
}

/// Parsed archive header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Declared header size
    pub header_size: u32,
    /// 32-bit archive size
    pub archive_size: u32,
    /// Layout generation
    pub format_version: FormatVersion,
    /// Sector size is `512 << sector_size_shift`
    pub sector_size_shift: u16,
    /// Low 32 bits of the hash-table offset
    pub hash_table_offset: u32,
    /// Low 32 bits of the block-table offset
    pub block_table_offset: u32,
    /// Number of hash-table entries
    pub hash_table_entries: u32,
    /// Number of block-table entries
    pub block_table_entries: u32,
    /// Present from [`FormatVersion::ExtendedV1`]
    pub extended_v1: Option<ExtendedV1Fields>,
    /// Present from [`FormatVersion::ExtendedV2`]
    pub extended_v2: Option<ExtendedV2Fields>,
    /// Present for [`FormatVersion::ExtendedV3`]
    pub extended_v3: Option<ExtendedV3Fields>,
}

impl Header {
    /// Empty header of the given version with all tables at offset 0
    pub fn new(format_version: FormatVersion, sector_size_shift: u16) -> ArchiveResult<Self> {
        let header = Self {
            header_size: format_version.header_size(),
            archive_size: 0,
            format_version,
            sector_size_shift,
            hash_table_offset: 0,
            block_table_offset: 0,
            hash_table_entries: 0,
            block_table_entries: 0,
            extended_v1: (format_version >= FormatVersion::ExtendedV1)
                .then(ExtendedV1Fields::default),
            extended_v2: (format_version >= FormatVersion::ExtendedV2)
                .then(ExtendedV2Fields::default),
            extended_v3: (format_version >= FormatVersion::ExtendedV3)
                .then(ExtendedV3Fields::default),
        };
        header.validate()?;
        Ok(header)
    }

    /// Read a header at the reader's current position
    pub fn read_from<R: Read + Seek>(reader: &mut R) -> ArchiveResult<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MPQ_MAGIC {
            return Err(ArchiveError::InvalidMagic(magic));
        }

        let basic = BasicFields::read(reader)?;
        let format_version = FormatVersion::from_raw(basic.format_version)
            .ok_or(ArchiveError::UnsupportedFormatVersion(basic.format_version))?;

        if format_version > FormatVersion::Basic
            && basic.header_size < format_version.header_size()
        {
            return Err(ArchiveError::InvalidHeader(format!(
                "header size {} too small for {format_version}",
                basic.header_size
            )));
        }

        let mut header = Self {
            header_size: basic.header_size,
            archive_size: basic.archive_size,
            format_version,
            sector_size_shift: basic.sector_size_shift,
            hash_table_offset: basic.hash_table_offset,
            block_table_offset: basic.block_table_offset,
            hash_table_entries: basic.hash_table_entries,
            block_table_entries: basic.block_table_entries,
            extended_v1: None,
            extended_v2: None,
            extended_v3: None,
        };

        let mut reached = FormatVersion::Basic;
        while let Some(stage) = reached.next().filter(|stage| *stage <= format_version) {
            trace!("reading {stage} header fields");
            match stage {
                FormatVersion::Basic => {}
                FormatVersion::ExtendedV1 => {
                    header.extended_v1 = Some(ExtendedV1Fields::read(reader)?);
                }
                FormatVersion::ExtendedV2 => {
                    header.extended_v2 = Some(ExtendedV2Fields::read(reader)?);
                }
                FormatVersion::ExtendedV3 => {
                    header.extended_v3 = Some(ExtendedV3Fields::read(reader)?);
                }
            }
            reached = stage;
        }

        header.validate()?;
        Ok(header)
    }

    /// Write the header (magic included) at the writer's current position
    pub fn write_to<W: Write + Seek>(&self, writer: &mut W) -> ArchiveResult<()> {
        writer.write_all(&MPQ_MAGIC)?;
        BasicFields {
            header_size: self.header_size,
            archive_size: self.archive_size,
            format_version: self.format_version.as_raw(),
            sector_size_shift: self.sector_size_shift,
            hash_table_offset: self.hash_table_offset,
            block_table_offset: self.block_table_offset,
            hash_table_entries: self.hash_table_entries,
            block_table_entries: self.block_table_entries,
        }
        .write(writer)?;

        if let Some(fields) = &self.extended_v1 {
            fields.write(writer)?;
        }
        if let Some(fields) = &self.extended_v2 {
            fields.write(writer)?;
        }
        if let Some(fields) = &self.extended_v3 {
            fields.write(writer)?;
        }
        Ok(())
    }

    fn validate(&self) -> ArchiveResult<()> {
        if self.sector_size_shift > MAX_SECTOR_SIZE_SHIFT {
            return Err(ArchiveError::InvalidHeader(format!(
                "sector size shift {} exceeds {MAX_SECTOR_SIZE_SHIFT}",
                self.sector_size_shift
            )));
        }
        Ok(())
    }

    /// Size of one full sector in bytes
    pub fn sector_size(&self) -> u32 {
        SECTOR_SIZE_BASE << self.sector_size_shift
    }

    /// Archive size, 64-bit when the header carries it
    pub fn archive_size64(&self) -> u64 {
        self.extended_v2
            .map_or(u64::from(self.archive_size), |fields| fields.archive_size)
    }

    /// Hash-table offset relative to the header, high bits merged
    pub fn hash_table_position(&self) -> u64 {
        match &self.extended_v1 {
            Some(fields) => {
                merge_high_bits(self.hash_table_offset, fields.hash_table_offset_high)
            }
            None => u64::from(self.hash_table_offset),
        }
    }

    /// Block-table offset relative to the header, high bits merged
    pub fn block_table_position(&self) -> u64 {
        match &self.extended_v1 {
            Some(fields) => {
                merge_high_bits(self.block_table_offset, fields.block_table_offset_high)
            }
            None => u64::from(self.block_table_offset),
        }
    }

    /// Hi-block table offset relative to the header, if the archive has one
    pub fn hi_block_table_position(&self) -> Option<u64> {
        self.extended_v1
            .map(|fields| fields.hi_block_table_offset)
            .filter(|&offset| offset != 0)
    }

    /// Digest fields, present only on [`FormatVersion::ExtendedV3`] headers
    pub fn digests(&self) -> Option<&ExtendedV3Fields> {
        self.extended_v3.as_ref()
    }
}

/// Widen a 32-bit offset with its 16 stored high bits
///
/// ```
/// use mpqkit_archive::header::merge_high_bits;
///
/// assert_eq!(merge_high_bits(0xFFFF_FFFF, 0x0001), 0x0001_FFFF_FFFF);
/// assert_eq!(merge_high_bits(0x1234, 0), 0x1234);
/// ```
pub fn merge_high_bits(low: u32, high: u16) -> u64 {
    ((u64::from(high) << 32) | u64::from(low)) & OFFSET_MASK_48
}

/// Preamble that points at the real header
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"MPQ\x1B")]
pub struct UserDataHeader {
    /// Size of the user data that follows this block
    pub user_data_size: u32,
    /// Offset of the archive header from the start of this block
    pub header_offset: u32,
    /// Size of this block
    pub user_data_header_size: u32,
}

/// Header found in a stream
#[derive(Debug, Clone)]
pub struct LocatedHeader {
    /// Stream position of the header; every table and block offset is
    /// relative to it
    pub archive_offset: u64,
    /// The parsed header
    pub header: Header,
    /// User-data block that pointed at the header, if any
    pub user_data: Option<UserDataHeader>,
}

/// Scan a stream for the archive header
///
/// Every 512-byte-aligned position below `search_limit` is checked for either
/// the header magic or a user-data block whose target holds the header magic.
pub fn locate_header<R: Read + Seek>(
    reader: &mut R,
    search_limit: u64,
) -> ArchiveResult<LocatedHeader> {
    let stream_len = reader.seek(SeekFrom::End(0))?;
    let limit = stream_len.min(search_limit);

    let mut position = 0u64;
    while position < limit && position + 4 <= stream_len {
        let magic = read_magic(reader, position)?;

        if magic == MPQ_MAGIC {
            reader.seek(SeekFrom::Start(position))?;
            let header = Header::read_from(reader)?;
            debug!(
                "found {} header at offset {position:#x}",
                header.format_version
            );
            return Ok(LocatedHeader {
                archive_offset: position,
                header,
                user_data: None,
            });
        }

        if magic == USER_DATA_MAGIC {
            reader.seek(SeekFrom::Start(position))?;
            let user_data = UserDataHeader::read(reader)?;
            let target = position + u64::from(user_data.header_offset);

            if target + 4 <= stream_len && read_magic(reader, target)? == MPQ_MAGIC {
                reader.seek(SeekFrom::Start(target))?;
                let header = Header::read_from(reader)?;
                debug!(
                    "found {} header at offset {target:#x} behind user data at {position:#x}",
                    header.format_version
                );
                return Ok(LocatedHeader {
                    archive_offset: target,
                    header,
                    user_data: Some(user_data),
                });
            }
            debug!("user data at {position:#x} points at {target:#x}, which holds no header");
        }

        position += HEADER_ALIGNMENT;
    }

    Err(ArchiveError::HeaderNotFound {
        searched: position.min(stream_len),
    })
}

fn read_magic<R: Read + Seek>(reader: &mut R, position: u64) -> ArchiveResult<[u8; 4]> {
    reader.seek(SeekFrom::Start(position))?;
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    Ok(magic)
}

/// Compare data against a stored MD5; an all-zero digest is not checked
pub(crate) fn verify_digest(
    table: &'static str,
    expected: &[u8; 16],
    data: &[u8],
) -> ArchiveResult<()> {
    if expected.iter().all(|&byte| byte == 0) {
        return Ok(());
    }
    let actual = md5::compute(data).0;
    if actual != *expected {
        return Err(ArchiveError::TableDigestMismatch {
            table,
            expected: *expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn sample_header(version: FormatVersion) -> Header {
        let mut header = Header::new(version, 3).expect("valid header");
        header.archive_size = 0x1000;
        header.hash_table_offset = 0x800;
        header.block_table_offset = 0x900;
        header.hash_table_entries = 16;
        header.block_table_entries = 4;
        header
    }

    fn encode(header: &Header) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        header.write_to(&mut cursor).expect("write header");
        cursor.into_inner()
    }

    #[test]
    fn test_header_sizes_match_layout() {
        for version in [
            FormatVersion::Basic,
            FormatVersion::ExtendedV1,
            FormatVersion::ExtendedV2,
            FormatVersion::ExtendedV3,
        ] {
            let bytes = encode(&sample_header(version));
            assert_eq!(bytes.len(), version.header_size() as usize, "{version}");
        }
    }

    #[test]
    fn test_basic_header_layout() {
        let bytes = encode(&sample_header(FormatVersion::Basic));
        assert_eq!(&bytes[0..4], b"MPQ\x1A");
        assert_eq!(&bytes[4..8], &0x20u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &0x1000u32.to_le_bytes());
        assert_eq!(&bytes[12..14], &0u16.to_le_bytes());
        assert_eq!(&bytes[14..16], &3u16.to_le_bytes());
        assert_eq!(&bytes[16..20], &0x800u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &0x900u32.to_le_bytes());
        assert_eq!(&bytes[24..28], &16u32.to_le_bytes());
        assert_eq!(&bytes[28..32], &4u32.to_le_bytes());
    }

    #[test]
    fn test_read_stops_after_version_fields() {
        let mut bytes = encode(&sample_header(FormatVersion::Basic));
        // Trailing bytes that would be extension fields on a later version
        bytes.extend_from_slice(&[0xAB; 64]);

        let mut cursor = Cursor::new(bytes);
        let header = Header::read_from(&mut cursor).expect("parse");
        assert_eq!(cursor.position(), 32);
        assert_eq!(header.extended_v1, None);
        assert_eq!(header.extended_v2, None);
        assert_eq!(header.extended_v3, None);
        assert_eq!(header.sector_size(), 4096);
    }

    #[test]
    fn test_extended_round_trip() {
        let mut header = sample_header(FormatVersion::ExtendedV3);
        header.extended_v1 = Some(ExtendedV1Fields {
            hi_block_table_offset: 0xA00,
            hash_table_offset_high: 1,
            block_table_offset_high: 2,
        });
        if let Some(fields) = header.extended_v3.as_mut() {
            fields.header_md5 = [7; 16];
            fields.raw_chunk_size = 0x4000;
        }

        let parsed = Header::read_from(&mut Cursor::new(encode(&header))).expect("parse");
        assert_eq!(parsed, header);
        assert_eq!(parsed.hash_table_position(), 0x1_0000_0800);
        assert_eq!(parsed.block_table_position(), 0x2_0000_0900);
        assert_eq!(parsed.hi_block_table_position(), Some(0xA00));
        assert_eq!(parsed.digests().map(|d| d.raw_chunk_size), Some(0x4000));
    }

    #[test]
    fn test_basic_offsets_are_not_extended() {
        let header = sample_header(FormatVersion::Basic);
        assert_eq!(header.hash_table_position(), 0x800);
        assert_eq!(header.block_table_position(), 0x900);
        assert_eq!(header.hi_block_table_position(), None);
        assert_eq!(header.archive_size64(), 0x1000);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = encode(&sample_header(FormatVersion::Basic));
        bytes[3] = 0x1B;
        let err = Header::read_from(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidMagic(m) if m == *b"MPQ\x1B"));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = encode(&sample_header(FormatVersion::Basic));
        bytes[12] = 4;
        let err = Header::read_from(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedFormatVersion(4)));
    }

    #[test]
    fn test_header_size_too_small_for_version() {
        let mut bytes = encode(&sample_header(FormatVersion::ExtendedV1));
        bytes[4..8].copy_from_slice(&0x20u32.to_le_bytes());
        let err = Header::read_from(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidHeader(_)));
    }

    #[test]
    fn test_sector_shift_limit() {
        assert!(Header::new(FormatVersion::Basic, MAX_SECTOR_SIZE_SHIFT).is_ok());
        assert!(matches!(
            Header::new(FormatVersion::Basic, MAX_SECTOR_SIZE_SHIFT + 1),
            Err(ArchiveError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_locate_header_at_aligned_offset() {
        let mut bytes = vec![0u8; 0x400];
        bytes[0x10..0x14].copy_from_slice(b"MPQ\x1A"); // unaligned, ignored
        bytes.extend(encode(&sample_header(FormatVersion::Basic)));

        let located = locate_header(&mut Cursor::new(bytes), u64::MAX).expect("locate");
        assert_eq!(located.archive_offset, 0x400);
        assert!(located.user_data.is_none());
    }

    #[test]
    fn test_locate_header_behind_user_data() {
        let user_data = UserDataHeader {
            user_data_size: 0x100,
            header_offset: 0x200,
            user_data_header_size: 0x10,
        };
        let mut cursor = Cursor::new(Vec::new());
        user_data.write(&mut cursor).expect("write user data");
        let mut bytes = cursor.into_inner();
        bytes.resize(0x200, 0);
        bytes.extend(encode(&sample_header(FormatVersion::ExtendedV1)));

        let located = locate_header(&mut Cursor::new(bytes), u64::MAX).expect("locate");
        assert_eq!(located.archive_offset, 0x200);
        assert_eq!(located.user_data, Some(user_data));
        assert_eq!(located.header.format_version, FormatVersion::ExtendedV1);
    }

    #[test]
    fn test_locate_respects_search_limit() {
        let mut bytes = vec![0u8; 0x600];
        bytes.extend(encode(&sample_header(FormatVersion::Basic)));

        let err = locate_header(&mut Cursor::new(bytes), 0x400).unwrap_err();
        assert!(matches!(err, ArchiveError::HeaderNotFound { searched: 0x400 }));
    }

    #[test]
    fn test_verify_digest() {
        let data = b"block table bytes";
        let digest = md5::compute(data).0;
        assert!(verify_digest("block table", &digest, data).is_ok());
        assert!(verify_digest("block table", &[0; 16], b"anything").is_ok());
        assert!(matches!(
            verify_digest("block table", &digest, b"tampered"),
            Err(ArchiveError::TableDigestMismatch { table: "block table", .. })
        ));
    }

    proptest! {
        /// Zero high bits leave any 32-bit offset unchanged
        #[test]
        fn merge_with_zero_high_is_identity(low in any::<u32>()) {
            prop_assert_eq!(merge_high_bits(low, 0), u64::from(low));
        }

        /// Merged offsets never exceed 48 bits and keep both halves
        #[test]
        fn merge_keeps_both_halves(low in any::<u32>(), high in any::<u16>()) {
            let merged = merge_high_bits(low, high);
            prop_assert!(merged <= OFFSET_MASK_48);
            prop_assert_eq!(merged as u32, low);
            prop_assert_eq!((merged >> 32) as u16, high);
        }
    }
}
