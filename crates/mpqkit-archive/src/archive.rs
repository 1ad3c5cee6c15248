//! Archive reader
//!
//! Opening an archive locates the header, then loads, decrypts and parses the
//! hash table, block table and (when present) hi-block table. The loaded
//! tables never change and live behind an [`Arc`], so several handles on
//! separate readers can share them.

use mpqkit_crypto::{detect_file_key, file_key};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{ArchiveError, ArchiveResult};
use crate::extract::{BlockReader, StorageMode};
use crate::header::{
    HEADER_DIGEST_SPAN, Header, LocatedHeader, UserDataHeader, locate_header, verify_digest,
};
use crate::listfile::{self, LISTFILE_NAME};
use crate::options::OpenOptions;
use crate::sector;
use crate::tables::{
    BLOCK_ENTRY_SIZE, BlockEntry, BlockTable, FileLookup, HASH_ENTRY_SIZE, HashTable,
    HiBlockTable,
};

/// Name of the weak signature file
pub const SIGNATURE_NAME: &str = "(signature)";

/// Magic of a strong signature block following the archive
pub const STRONG_SIGNATURE_MAGIC: [u8; 4] = *b"NGIS";

/// Digital signatures found in an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Neither signature is present
    None,
    /// A `(signature)` file is stored in the archive
    Weak,
    /// A signature block follows the archive data
    Strong,
}

/// Tables loaded when an archive is opened
#[derive(Debug, Clone)]
pub struct ArchiveTables {
    located: LocatedHeader,
    hash_table: HashTable,
    block_table: BlockTable,
    hi_block_table: Option<HiBlockTable>,
}

impl ArchiveTables {
    fn load<R: Read + Seek>(reader: &mut R, options: &OpenOptions) -> ArchiveResult<Self> {
        let located = locate_header(reader, options.header_search_limit)?;
        let header = &located.header;
        let base = located.archive_offset;
        let stream_len = reader.seek(SeekFrom::End(0))?;

        let hash_len = header.hash_table_entries as usize * HASH_ENTRY_SIZE;
        let block_len = header.block_table_entries as usize * BLOCK_ENTRY_SIZE;

        if let Some(v3) = header.digests() {
            for (table, stored, expected) in [
                ("hash table", v3.hash_table_size, hash_len),
                ("block table", v3.block_table_size, block_len),
            ] {
                if stored != 0 && stored < expected as u64 {
                    return Err(ArchiveError::Unsupported(format!(
                        "compressed {table} ({stored} of {expected} bytes)"
                    )));
                }
            }
        }

        let hash_raw = read_table(
            reader,
            "hash table",
            table_position(base, header.hash_table_position(), "hash table")?,
            hash_len,
            stream_len,
        )?;
        let block_raw = read_table(
            reader,
            "block table",
            table_position(base, header.block_table_position(), "block table")?,
            block_len,
            stream_len,
        )?;
        let hi_raw = header
            .hi_block_table_position()
            .map(|position| {
                read_table(
                    reader,
                    "hi-block table",
                    table_position(base, position, "hi-block table")?,
                    header.block_table_entries as usize * 2,
                    stream_len,
                )
            })
            .transpose()?;

        if options.verify_table_digests
            && let Some(v3) = header.digests()
        {
            let header_raw = read_table(reader, "header", base, HEADER_DIGEST_SPAN, stream_len)?;
            verify_digest("header", &v3.header_md5, &header_raw)?;
            verify_digest("hash table", &v3.hash_table_md5, &hash_raw)?;
            verify_digest("block table", &v3.block_table_md5, &block_raw)?;
            if let Some(hi_raw) = &hi_raw {
                verify_digest("hi-block table", &v3.hi_block_table_md5, hi_raw)?;
            }
            debug!("table digests verified");
        }

        let hash_table = HashTable::from_encrypted(&hash_raw)?;
        let block_table = BlockTable::from_encrypted(&block_raw)?;
        let hi_block_table = hi_raw
            .map(|data| HiBlockTable::parse(&data, header.block_table_entries as usize))
            .transpose()?;

        debug!(
            "opened {} archive at {base:#x}: {} hash entries, {} blocks, sector size {}{}",
            header.format_version,
            hash_table.len(),
            block_table.len(),
            header.sector_size(),
            if hi_block_table.is_some() {
                ", hi-block table"
            } else {
                ""
            }
        );

        Ok(Self {
            located,
            hash_table,
            block_table,
            hi_block_table,
        })
    }
}

fn table_position(base: u64, position: u64, table: &'static str) -> ArchiveResult<u64> {
    base.checked_add(position).ok_or_else(|| {
        ArchiveError::table(
            table,
            format!("offset {position:#x} overflows past the archive base {base:#x}"),
        )
    })
}

fn read_table<R: Read + Seek>(
    reader: &mut R,
    table: &'static str,
    position: u64,
    len: usize,
    stream_len: u64,
) -> ArchiveResult<Vec<u8>> {
    let end = position.checked_add(len as u64);
    if end.is_none_or(|end| end > stream_len) {
        return Err(ArchiveError::table(
            table,
            format!(
                "{len} bytes at {position:#x} run past the end of the {stream_len}-byte stream"
            ),
        ));
    }
    reader.seek(SeekFrom::Start(position))?;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;
    Ok(data)
}

/// An open archive
///
/// Reading files moves the underlying reader, so extraction takes `&mut
/// self`. Use [`Archive::with_reader`] to get an independent handle on the
/// same tables for another thread.
#[derive(Debug)]
pub struct Archive<R> {
    reader: R,
    tables: Arc<ArchiveTables>,
    options: OpenOptions,
}

impl Archive<BufReader<File>> {
    /// Open an archive file with default options
    pub fn open_path(path: impl AsRef<Path>) -> ArchiveResult<Self> {
        Self::open_path_with_options(path, OpenOptions::default())
    }

    /// Open an archive file
    pub fn open_path_with_options(
        path: impl AsRef<Path>,
        options: OpenOptions,
    ) -> ArchiveResult<Self> {
        let path = path.as_ref();
        debug!("opening archive {}", path.display());
        let file = File::open(path)?;
        Self::open_with_options(BufReader::new(file), options)
    }
}

impl<R: Read + Seek> Archive<R> {
    /// Open an archive with default options
    pub fn open(reader: R) -> ArchiveResult<Self> {
        Self::open_with_options(reader, OpenOptions::default())
    }

    /// Open an archive
    ///
    /// Fails if the header or any table cannot be loaded.
    pub fn open_with_options(mut reader: R, options: OpenOptions) -> ArchiveResult<Self> {
        let tables = ArchiveTables::load(&mut reader, &options)?;
        Ok(Self {
            reader,
            tables: Arc::new(tables),
            options,
        })
    }

    /// A handle on `reader` that shares this archive's tables
    ///
    /// `reader` must hold the same archive bytes.
    pub fn with_reader<S: Read + Seek>(&self, reader: S) -> Archive<S> {
        Archive {
            reader,
            tables: Arc::clone(&self.tables),
            options: self.options.clone(),
        }
    }

    /// Archive header
    pub fn header(&self) -> &Header {
        &self.tables.located.header
    }

    /// Stream position of the header
    pub fn archive_offset(&self) -> u64 {
        self.tables.located.archive_offset
    }

    /// User-data block in front of the header, if any
    pub fn user_data(&self) -> Option<&UserDataHeader> {
        self.tables.located.user_data.as_ref()
    }

    /// Decrypted hash table
    pub fn hash_table(&self) -> &HashTable {
        &self.tables.hash_table
    }

    /// Decrypted block table
    pub fn block_table(&self) -> &BlockTable {
        &self.tables.block_table
    }

    /// Hi-block table, if the archive has one
    pub fn hi_block_table(&self) -> Option<&HiBlockTable> {
        self.tables.hi_block_table.as_ref()
    }

    /// Options the archive was opened with
    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    /// Size of one full sector
    pub fn sector_size(&self) -> u32 {
        self.header().sector_size()
    }

    /// Look up a path in the configured locale
    pub fn lookup(&self, path: &str) -> FileLookup {
        self.tables
            .hash_table
            .find_entry(path, self.options.locale, &self.tables.block_table)
    }

    /// Whether `path` names a live file
    pub fn contains(&self, path: &str) -> bool {
        self.lookup(path).is_found()
    }

    /// Block records in table order, with their full data offsets
    pub fn blocks(&self) -> impl Iterator<Item = (usize, u64, &BlockEntry)> + '_ {
        self.tables
            .block_table
            .entries()
            .iter()
            .enumerate()
            .map(|(index, block)| (index, self.block_position(index, block), block))
    }

    /// Extract a file by path
    ///
    /// Returns `None` when the path does not exist or has been deleted.
    pub fn extract_file(&mut self, path: &str) -> ArchiveResult<Option<Vec<u8>>> {
        let slot = match self.lookup(path) {
            FileLookup::Found(slot) => slot,
            FileLookup::Deleted(_) => {
                debug!("{path} has been deleted");
                return Ok(None);
            }
            FileLookup::Absent => return Ok(None),
        };

        let index = slot.entry.block_index as usize;
        let block = *self.block(index)?;
        let key = block.is_encrypted().then(|| {
            file_key(
                path,
                block.has_adjusted_key(),
                block.offset,
                block.file_size,
            )
        });

        self.extract_block(index, &block, key).map(Some)
    }

    /// Extract a file by block index, for archives without a listfile
    ///
    /// Encrypted compressed files have their key recovered from the sector
    /// table. Other encrypted files need their name and are unsupported here.
    /// Returns `None` for a block that holds no file.
    pub fn extract_by_index(&mut self, index: usize) -> ArchiveResult<Option<Vec<u8>>> {
        let block = *self.block(index)?;
        if block.is_deleted() {
            return Ok(None);
        }
        let mode = StorageMode::of(&block);
        if !block.is_encrypted() || mode == StorageMode::Empty {
            return self.extract_block(index, &block, None).map(Some);
        }
        if mode != StorageMode::CompressedSectors {
            return Err(ArchiveError::Unsupported(format!(
                "encrypted block {index} without a sector table needs its file name"
            )));
        }

        let blob = self.read_blob(index, &block)?;
        let count = sector::sector_count(block.file_size, self.sector_size());
        let entries = count + if block.has_sector_checksums() { 2 } else { 1 };
        let words: Vec<u32> = blob
            .chunks_exact(4)
            .take(2)
            .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect();
        let key = detect_file_key(&words, (entries * 4) as u32, self.sector_size())?;
        debug!("block {index}: recovered file key {key:#010x}");

        self.decode_blob(&blob, &block, Some(key)).map(Some)
    }

    /// Whether the archive stores a listfile
    pub fn has_listfile(&self) -> bool {
        self.contains(LISTFILE_NAME)
    }

    /// Paths named by the listfile, or `None` without one
    pub fn file_list(&mut self) -> ArchiveResult<Option<Vec<String>>> {
        let Some(data) = self.extract_file(LISTFILE_NAME)? else {
            return Ok(None);
        };
        let names = listfile::parse(&data);

        let unresolved = names.iter().filter(|name| !self.contains(name)).count();
        if unresolved > 0 {
            warn!(
                "{unresolved} of {} listfile entries do not resolve to a file",
                names.len()
            );
        }
        Ok(Some(names))
    }

    /// Report which digital signatures the archive carries
    pub fn detect_signature(&mut self) -> ArchiveResult<SignatureStatus> {
        if self.contains(SIGNATURE_NAME) {
            return Ok(SignatureStatus::Weak);
        }

        let Some(end) = self
            .archive_offset()
            .checked_add(self.header().archive_size64())
        else {
            return Ok(SignatureStatus::None);
        };
        let stream_len = self.reader.seek(SeekFrom::End(0))?;
        if end.checked_add(4).is_some_and(|magic_end| magic_end <= stream_len) {
            self.reader.seek(SeekFrom::Start(end))?;
            let mut magic = [0u8; 4];
            self.reader.read_exact(&mut magic)?;
            if magic == STRONG_SIGNATURE_MAGIC {
                return Ok(SignatureStatus::Strong);
            }
        }
        Ok(SignatureStatus::None)
    }

    /// Verify the archive's digital signature
    ///
    /// Succeeds with [`SignatureStatus::None`] for unsigned archives.
    /// Verifying either signature kind is not implemented.
    pub fn verify_signature(&mut self) -> ArchiveResult<SignatureStatus> {
        match self.detect_signature()? {
            SignatureStatus::None => Ok(SignatureStatus::None),
            kind => Err(ArchiveError::Unsupported(format!(
                "{kind:?} signature verification"
            ))),
        }
    }

    /// Release the underlying reader
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn block(&self, index: usize) -> ArchiveResult<&BlockEntry> {
        let blocks = &self.tables.block_table;
        blocks.get(index).ok_or(ArchiveError::BlockIndexOutOfRange {
            index,
            count: blocks.len(),
        })
    }

    fn block_position(&self, index: usize, block: &BlockEntry) -> u64 {
        match &self.tables.hi_block_table {
            Some(hi) => hi.resolve(index, block.offset),
            None => u64::from(block.offset),
        }
    }

    fn extract_block(
        &mut self,
        index: usize,
        block: &BlockEntry,
        key: Option<u32>,
    ) -> ArchiveResult<Vec<u8>> {
        let blob = self.read_blob(index, block)?;
        self.decode_blob(&blob, block, key)
    }

    fn read_blob(&mut self, index: usize, block: &BlockEntry) -> ArchiveResult<Vec<u8>> {
        if block.is_patch_file() {
            return Err(ArchiveError::Unsupported(format!(
                "block {index} holds a patch"
            )));
        }
        let limit = self.options.max_file_size;
        let size = u64::from(block.file_size.max(block.stored_size));
        if size > limit {
            return Err(ArchiveError::FileTooLarge { size, limit });
        }

        let position = self.archive_offset() + self.block_position(index, block);
        self.reader.seek(SeekFrom::Start(position))?;
        let mut blob = vec![0u8; block.stored_size as usize];
        self.reader.read_exact(&mut blob)?;
        Ok(blob)
    }

    fn decode_blob(
        &self,
        blob: &[u8],
        block: &BlockEntry,
        key: Option<u32>,
    ) -> ArchiveResult<Vec<u8>> {
        BlockReader {
            blob,
            block,
            key,
            sector_size: self.sector_size(),
            verify_checksums: self.options.verify_sector_checksums,
        }
        .extract()
    }
}
