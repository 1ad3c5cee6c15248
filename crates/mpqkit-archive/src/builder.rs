//! Archive writer
//!
//! Produces complete archives in memory: header, file data, hash table, block
//! table and (from [`FormatVersion::ExtendedV1`]) an all-zero hi-block table.
//! Everything it writes can be read back by [`Archive`](crate::Archive).

use mpqkit_crypto::{PathHashes, encrypt_block, file_key};
use std::collections::HashSet;
use std::io::{Cursor, Write};
use tracing::debug;

use crate::compression::{CompressionMask, compress_chain};
use crate::error::{ArchiveError, ArchiveResult};
use crate::header::{ExtendedV1Fields, FormatVersion, HEADER_DIGEST_SPAN, Header};
use crate::listfile::{self, LISTFILE_NAME};
use crate::sector::{SectorChecksums, encode_offsets};
use crate::tables::{
    BLOCK_ENTRY_SIZE, BLOCK_INDEX_DELETED, BlockEntry, BlockFlags, BlockTable, HASH_ENTRY_SIZE,
    HashTable, HiBlockTable, LOCALE_NEUTRAL,
};

/// Default sector size shift (4096-byte sectors)
pub const DEFAULT_SECTOR_SIZE_SHIFT: u16 = 3;

/// How a single file is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOptions {
    compression: Option<CompressionMask>,
    encrypted: bool,
    adjusted_key: bool,
    single_unit: bool,
    sector_checksums: bool,
    locale: u16,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            compression: None,
            encrypted: false,
            adjusted_key: false,
            single_unit: false,
            sector_checksums: false,
            locale: LOCALE_NEUTRAL,
        }
    }
}

impl FileOptions {
    /// Stored uncompressed, unencrypted, in sectors
    pub fn new() -> Self {
        Self::default()
    }

    /// Compress with the given codec selector (0 disables compression)
    #[must_use]
    pub fn compression(mut self, mask: u8) -> Self {
        self.compression = (mask != 0).then_some(CompressionMask::new(mask));
        self
    }

    /// Encrypt the file
    #[must_use]
    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// Mix the block offset and file size into the key (implies encryption)
    #[must_use]
    pub fn adjusted_key(mut self, adjusted: bool) -> Self {
        self.adjusted_key = adjusted;
        self.encrypted |= adjusted;
        self
    }

    /// Store as one unit instead of sectors
    #[must_use]
    pub fn single_unit(mut self, single_unit: bool) -> Self {
        self.single_unit = single_unit;
        self
    }

    /// Append a checksum table to compressed sectored files
    #[must_use]
    pub fn sector_checksums(mut self, checksums: bool) -> Self {
        self.sector_checksums = checksums;
        self
    }

    /// Locale of the hash entry
    #[must_use]
    pub fn locale(mut self, locale: u16) -> Self {
        self.locale = locale;
        self
    }
}

#[derive(Debug, Clone)]
struct PendingFile {
    path: String,
    contents: Vec<u8>,
    options: FileOptions,
}

/// Builder for archives
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    format_version: FormatVersion,
    sector_size_shift: u16,
    hash_table_size: Option<usize>,
    files: Vec<PendingFile>,
    deleted: Vec<(String, u16)>,
    listfile: bool,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveBuilder {
    /// Empty basic-format archive with 4096-byte sectors
    pub fn new() -> Self {
        Self {
            format_version: FormatVersion::Basic,
            sector_size_shift: DEFAULT_SECTOR_SIZE_SHIFT,
            hash_table_size: None,
            files: Vec::new(),
            deleted: Vec::new(),
            listfile: false,
        }
    }

    /// Header format to write
    #[must_use]
    pub fn format_version(mut self, version: FormatVersion) -> Self {
        self.format_version = version;
        self
    }

    /// Sector size as `512 << shift`
    #[must_use]
    pub fn sector_size_shift(mut self, shift: u16) -> Self {
        self.sector_size_shift = shift;
        self
    }

    /// Fixed number of hash-table slots
    ///
    /// Defaults to twice the number of entries rounded up to a power of two,
    /// and at least 16.
    #[must_use]
    pub fn hash_table_size(mut self, slots: usize) -> Self {
        self.hash_table_size = Some(slots);
        self
    }

    /// Generate a `(listfile)` naming every added file
    #[must_use]
    pub fn with_listfile(mut self, listfile: bool) -> Self {
        self.listfile = listfile;
        self
    }

    /// Add a file stored uncompressed
    #[must_use]
    pub fn add_file(self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.add_file_with_options(path, contents, FileOptions::default())
    }

    /// Add a file
    #[must_use]
    pub fn add_file_with_options(
        mut self,
        path: impl Into<String>,
        contents: impl Into<Vec<u8>>,
        options: FileOptions,
    ) -> Self {
        self.files.push(PendingFile {
            path: path.into(),
            contents: contents.into(),
            options,
        });
        self
    }

    /// Add a tombstone for a path that was deleted
    #[must_use]
    pub fn add_deleted(mut self, path: impl Into<String>) -> Self {
        self.deleted.push((path.into(), LOCALE_NEUTRAL));
        self
    }

    fn slot_count(&self) -> usize {
        let entries = self.files.len() + self.deleted.len() + usize::from(self.listfile);
        self.hash_table_size
            .unwrap_or_else(|| (entries * 2).next_power_of_two().max(16))
    }

    /// Serialize the archive
    pub fn build(&self) -> ArchiveResult<Vec<u8>> {
        let mut header = Header::new(self.format_version, self.sector_size_shift)?;
        let mut layout = Layout {
            data_start: header.header_size,
            sector_size: header.sector_size() as usize,
            data: Vec::new(),
            blocks: BlockTable::default(),
            hashes: HashTable::with_size(self.slot_count()),
            seen: HashSet::new(),
        };

        for file in &self.files {
            layout.push_file(&file.path, &file.contents, &file.options)?;
        }
        if self.listfile {
            let names: Vec<&str> = self.files.iter().map(|file| file.path.as_str()).collect();
            let options = FileOptions::new().compression(CompressionMask::DEFLATE);
            layout.push_file(LISTFILE_NAME, &listfile::build(&names), &options)?;
        }
        for (path, locale) in &self.deleted {
            layout.push_tombstone(path, *locale)?;
        }

        let hash_raw = layout.hashes.to_encrypted_bytes()?;
        let block_raw = layout.blocks.to_encrypted_bytes()?;
        let block_count = layout.blocks.len();

        let hash_offset = u64::from(layout.data_start) + layout.data.len() as u64;
        let block_offset = hash_offset + hash_raw.len() as u64;
        let mut end = block_offset + block_raw.len() as u64;

        header.hash_table_offset = to_u32(hash_offset, "hash table offset")?;
        header.block_table_offset = to_u32(block_offset, "block table offset")?;
        header.hash_table_entries = to_u32(layout.hashes.len() as u64, "hash table size")?;
        header.block_table_entries = to_u32(block_count as u64, "block table size")?;

        let hi_raw = header.extended_v1.is_some().then(|| {
            HiBlockTable::new(vec![0; block_count]).to_bytes()
        });
        if let Some(hi_raw) = &hi_raw {
            header.extended_v1 = Some(ExtendedV1Fields {
                hi_block_table_offset: end,
                ..ExtendedV1Fields::default()
            });
            end += hi_raw.len() as u64;
        }

        header.archive_size = to_u32(end, "archive size")?;
        if let Some(fields) = header.extended_v2.as_mut() {
            fields.archive_size = end;
        }
        if let Some(fields) = header.extended_v3.as_mut() {
            fields.hash_table_size = (layout.hashes.len() * HASH_ENTRY_SIZE) as u64;
            fields.block_table_size = (block_count * BLOCK_ENTRY_SIZE) as u64;
            fields.hi_block_table_size = hi_raw.as_ref().map_or(0, |raw| raw.len() as u64);
            fields.hash_table_md5 = md5::compute(&hash_raw).0;
            fields.block_table_md5 = md5::compute(&block_raw).0;
            if let Some(hi_raw) = &hi_raw {
                fields.hi_block_table_md5 = md5::compute(hi_raw).0;
            }
        }

        let mut header_raw = serialize_header(&header)?;
        if let Some(fields) = header.extended_v3.as_mut() {
            fields.header_md5 = md5::compute(&header_raw[..HEADER_DIGEST_SPAN]).0;
            header_raw = serialize_header(&header)?;
        }

        debug!(
            "built {} archive: {} blocks, {} hash slots, {end} bytes",
            header.format_version,
            block_count,
            layout.hashes.len()
        );

        let mut archive = header_raw;
        archive.extend_from_slice(&layout.data);
        archive.extend_from_slice(&hash_raw);
        archive.extend_from_slice(&block_raw);
        if let Some(hi_raw) = hi_raw {
            archive.extend_from_slice(&hi_raw);
        }
        Ok(archive)
    }

    /// Serialize the archive into `writer`
    pub fn write_to<W: Write>(&self, writer: &mut W) -> ArchiveResult<()> {
        writer.write_all(&self.build()?)?;
        Ok(())
    }
}

/// File data and tables accumulated while building
struct Layout {
    data_start: u32,
    sector_size: usize,
    data: Vec<u8>,
    blocks: BlockTable,
    hashes: HashTable,
    seen: HashSet<(PathHashes, u16)>,
}

impl Layout {
    fn claim(&mut self, path: &str, locale: u16) -> ArchiveResult<PathHashes> {
        let hashes = PathHashes::new(path);
        if !self.seen.insert((hashes, locale)) {
            return Err(ArchiveError::InvalidInput(format!(
                "{path} added twice for locale {locale}"
            )));
        }
        Ok(hashes)
    }

    fn push_file(
        &mut self,
        path: &str,
        contents: &[u8],
        options: &FileOptions,
    ) -> ArchiveResult<()> {
        let hashes = self.claim(path, options.locale)?;
        let file_size = to_u32(contents.len() as u64, "file size")?;
        let offset = to_u32(
            u64::from(self.data_start) + self.data.len() as u64,
            "block offset",
        )?;

        let key = options
            .encrypted
            .then(|| file_key(path, options.adjusted_key, offset, file_size));
        let (stored, layout_flags) = self.encode(contents, options, key)?;

        let mut flags = BlockFlags::new(BlockFlags::EXISTS | layout_flags);
        if options.encrypted {
            flags = flags.with(BlockFlags::ENCRYPTED);
            if options.adjusted_key {
                flags = flags.with(BlockFlags::FIX_KEY);
            }
        }

        let index = self.blocks.push(BlockEntry {
            offset,
            stored_size: to_u32(stored.len() as u64, "stored size")?,
            file_size,
            flags,
        });
        self.hashes.insert(&hashes, options.locale, index as u32)?;
        self.data.extend_from_slice(&stored);
        Ok(())
    }

    fn push_tombstone(&mut self, path: &str, locale: u16) -> ArchiveResult<()> {
        let hashes = self.claim(path, locale)?;
        self.hashes.insert(&hashes, locale, BLOCK_INDEX_DELETED)?;
        Ok(())
    }

    /// Stored bytes and layout flags of a file
    fn encode(
        &self,
        contents: &[u8],
        options: &FileOptions,
        key: Option<u32>,
    ) -> ArchiveResult<(Vec<u8>, u32)> {
        if options.single_unit {
            return encode_single_unit(contents, options.compression, key);
        }
        if let Some(mask) = options.compression
            && !contents.is_empty()
        {
            let blob = encode_compressed_sectors(
                contents,
                mask,
                key,
                self.sector_size,
                options.sector_checksums,
            )?;
            // Equal sizes would read back as uncompressed
            if blob.len() != contents.len() {
                return Ok((blob, BlockFlags::COMPRESS | checksum_flag(options)));
            }
        }
        Ok((encode_plain_sectors(contents, key, self.sector_size), 0))
    }
}

fn checksum_flag(options: &FileOptions) -> u32 {
    if options.sector_checksums {
        BlockFlags::SECTOR_CRC
    } else {
        0
    }
}

fn encode_single_unit(
    contents: &[u8],
    compression: Option<CompressionMask>,
    key: Option<u32>,
) -> ArchiveResult<(Vec<u8>, u32)> {
    let mut flags = BlockFlags::SINGLE_UNIT;
    let mut unit = contents.to_vec();
    if let Some(mask) = compression {
        let compressed = compress_chain(contents, mask)?;
        if compressed.len() < contents.len() {
            unit = compressed;
            flags |= BlockFlags::COMPRESS;
        }
    }
    if let Some(key) = key {
        encrypt_block(&mut unit, key);
    }
    Ok((unit, flags))
}

fn encode_compressed_sectors(
    contents: &[u8],
    mask: CompressionMask,
    key: Option<u32>,
    sector_size: usize,
    checksums: bool,
) -> ArchiveResult<Vec<u8>> {
    let sectors: Vec<&[u8]> = contents.chunks(sector_size).collect();
    let mut units = Vec::with_capacity(sectors.len() + 1);

    for (index, sector) in sectors.iter().enumerate() {
        let compressed = compress_chain(sector, mask)?;
        let mut unit = if compressed.len() < sector.len() {
            compressed
        } else {
            sector.to_vec()
        };
        if let Some(key) = key {
            encrypt_block(&mut unit, key.wrapping_add(index as u32));
        }
        units.push(unit);
    }

    if checksums {
        let mut table = SectorChecksums::compute(sectors.iter().copied()).to_bytes();
        if let Some(key) = key {
            encrypt_block(&mut table, key.wrapping_add(sectors.len() as u32));
        }
        units.push(table);
    }

    let mut offsets = Vec::with_capacity(units.len() + 1);
    let mut position = ((units.len() + 1) * 4) as u32;
    offsets.push(position);
    for unit in &units {
        position += unit.len() as u32;
        offsets.push(position);
    }

    let mut blob = encode_offsets(&offsets, key.map(|key| key.wrapping_sub(1)));
    for unit in units {
        blob.extend_from_slice(&unit);
    }
    Ok(blob)
}

fn encode_plain_sectors(contents: &[u8], key: Option<u32>, sector_size: usize) -> Vec<u8> {
    let mut blob = contents.to_vec();
    if let Some(key) = key {
        for (index, sector) in blob.chunks_mut(sector_size).enumerate() {
            encrypt_block(sector, key.wrapping_add(index as u32));
        }
    }
    blob
}

fn serialize_header(header: &Header) -> ArchiveResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::with_capacity(header.header_size as usize));
    header.write_to(&mut cursor)?;
    Ok(cursor.into_inner())
}

fn to_u32(value: u64, what: &str) -> ArchiveResult<u32> {
    u32::try_from(value)
        .map_err(|_| ArchiveError::InvalidInput(format!("{what} {value} does not fit in 32 bits")))
}
