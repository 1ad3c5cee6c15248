//! Integration tests for opening archives
//!
//! Header location, the extended header formats, table digests, listfiles,
//! signatures and sharing loaded tables between handles.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use binrw::BinWrite;
use mpqkit_archive::compression::CompressionMask;
use mpqkit_archive::header::{FormatVersion, HEADER_ALIGNMENT, UserDataHeader};
use mpqkit_archive::{
    Archive, ArchiveBuilder, ArchiveError, FileOptions, OpenOptions, SignatureStatus,
};
use pretty_assertions::assert_eq;
use std::io::{Cursor, Write};
use std::thread;

fn sample_archive(version: FormatVersion) -> Vec<u8> {
    ArchiveBuilder::new()
        .format_version(version)
        .add_file("readme.txt", b"hello".to_vec())
        .add_file_with_options(
            "maps\\(2)bootybay.w3m",
            b"terrain terrain terrain terrain terrain terrain".repeat(40),
            FileOptions::new()
                .compression(CompressionMask::BZIP2)
                .encrypted(true),
        )
        .with_listfile(true)
        .build()
        .unwrap()
}

fn open(bytes: Vec<u8>) -> Archive<Cursor<Vec<u8>>> {
    Archive::open(Cursor::new(bytes)).expect("archive should open")
}

#[test]
fn every_format_version_reads_back() {
    for version in [
        FormatVersion::Basic,
        FormatVersion::ExtendedV1,
        FormatVersion::ExtendedV2,
        FormatVersion::ExtendedV3,
    ] {
        let mut archive = open(sample_archive(version));
        assert_eq!(archive.header().format_version, version);
        assert_eq!(
            archive.hi_block_table().is_some(),
            version >= FormatVersion::ExtendedV1,
            "{version}"
        );
        assert_eq!(
            archive.extract_file("readme.txt").unwrap(),
            Some(b"hello".to_vec()),
            "{version}"
        );
        let map = archive.extract_file("maps\\(2)bootybay.w3m").unwrap();
        assert_eq!(map.map(|data| data.len()), Some(47 * 40), "{version}");
    }
}

#[test]
fn extended_v1_hi_block_table() {
    let archive = open(sample_archive(FormatVersion::ExtendedV1));
    let hi = archive.hi_block_table().expect("hi-block table");
    assert_eq!(hi.len(), archive.block_table().len());
    assert!((0..hi.len()).all(|index| hi.get(index) == 0));

    for (index, position, block) in archive.blocks() {
        assert_eq!(position, u64::from(block.offset), "block {index}");
    }
}

#[test]
fn header_behind_user_data() {
    let archive_bytes = sample_archive(FormatVersion::Basic);

    let mut bytes = Cursor::new(Vec::new());
    UserDataHeader {
        user_data_size: 0x100,
        header_offset: HEADER_ALIGNMENT as u32,
        user_data_header_size: 12,
    }
    .write(&mut bytes)
    .unwrap();
    let mut bytes = bytes.into_inner();
    bytes.resize(HEADER_ALIGNMENT as usize, 0);
    bytes.extend_from_slice(&archive_bytes);

    let mut archive = open(bytes);
    assert_eq!(archive.archive_offset(), HEADER_ALIGNMENT);
    assert_eq!(archive.user_data().map(|user| user.user_data_size), Some(0x100));
    assert_eq!(
        archive.extract_file("readme.txt").unwrap(),
        Some(b"hello".to_vec())
    );
    assert!(archive.extract_file("maps\\(2)bootybay.w3m").unwrap().is_some());
}

#[test]
fn header_after_leading_junk() {
    let mut bytes = vec![0x5A; 2 * HEADER_ALIGNMENT as usize];
    bytes.extend_from_slice(&sample_archive(FormatVersion::ExtendedV1));

    let mut archive = open(bytes);
    assert_eq!(archive.archive_offset(), 2 * HEADER_ALIGNMENT);
    assert!(archive.user_data().is_none());
    assert_eq!(
        archive.extract_file("readme.txt").unwrap(),
        Some(b"hello".to_vec())
    );
}

#[test]
fn header_search_limit() {
    let mut bytes = vec![0; 2 * HEADER_ALIGNMENT as usize];
    bytes.extend_from_slice(&sample_archive(FormatVersion::Basic));

    let options = OpenOptions::new().header_search_limit(HEADER_ALIGNMENT);
    assert!(matches!(
        Archive::open_with_options(Cursor::new(bytes), options),
        Err(ArchiveError::HeaderNotFound { .. })
    ));
}

#[test]
fn format_errors_abort_open() {
    assert!(matches!(
        Archive::open(Cursor::new(vec![0u8; 4096])),
        Err(ArchiveError::HeaderNotFound { .. })
    ));

    let mut bad_version = sample_archive(FormatVersion::Basic);
    bad_version[12] = 9;
    assert!(matches!(
        Archive::open(Cursor::new(bad_version)),
        Err(ArchiveError::UnsupportedFormatVersion(9))
    ));

    let mut truncated = sample_archive(FormatVersion::Basic);
    truncated.truncate(truncated.len() - 8);
    assert!(matches!(
        Archive::open(Cursor::new(truncated)),
        Err(ArchiveError::InvalidTable {
            table: "block table",
            ..
        })
    ));
}

#[test]
fn table_digests() {
    let bytes = sample_archive(FormatVersion::ExtendedV3);
    let archive = open(bytes.clone());
    let hash_table_start = archive.header().hash_table_position() as usize;

    let mut corrupt = bytes.clone();
    corrupt[hash_table_start] ^= 0xFF;
    assert!(matches!(
        Archive::open(Cursor::new(corrupt.clone())),
        Err(ArchiveError::TableDigestMismatch {
            table: "hash table",
            ..
        })
    ));

    let options = OpenOptions::new().verify_table_digests(false);
    assert!(Archive::open_with_options(Cursor::new(corrupt), options).is_ok());

    // Archive size lives inside the digested header bytes
    let mut header_edit = bytes;
    header_edit[8] ^= 0x01;
    assert!(matches!(
        Archive::open(Cursor::new(header_edit)),
        Err(ArchiveError::TableDigestMismatch {
            table: "header",
            ..
        })
    ));
}

#[test]
fn listfile() {
    let mut archive = open(sample_archive(FormatVersion::Basic));
    assert!(archive.has_listfile());
    assert_eq!(
        archive.file_list().unwrap(),
        Some(vec![
            "readme.txt".to_string(),
            "maps\\(2)bootybay.w3m".to_string()
        ])
    );

    let mut bare = open(
        ArchiveBuilder::new()
            .add_file("a.txt", b"a".to_vec())
            .build()
            .unwrap(),
    );
    assert!(!bare.has_listfile());
    assert_eq!(bare.file_list().unwrap(), None);
}

#[test]
fn open_from_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&sample_archive(FormatVersion::ExtendedV1))
        .unwrap();
    file.flush().unwrap();

    let mut archive = Archive::open_path(file.path()).unwrap();
    assert_eq!(archive.sector_size(), 4096);
    assert_eq!(
        archive.extract_file("readme.txt").unwrap(),
        Some(b"hello".to_vec())
    );
}

#[test]
fn missing_path_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Archive::open_path(dir.path().join("nope.mpq")),
        Err(ArchiveError::Io(_))
    ));
}

#[test]
fn handles_share_tables_across_threads() {
    let bytes = sample_archive(FormatVersion::Basic);
    let archive = open(bytes.clone());

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let mut handle = archive.with_reader(Cursor::new(bytes.clone()));
            thread::spawn(move || handle.extract_file("maps\\(2)bootybay.w3m").unwrap())
        })
        .collect();

    for worker in workers {
        let data = worker.join().unwrap();
        assert_eq!(data.map(|d| d.len()), Some(47 * 40));
    }
}

#[test]
fn signatures() {
    let mut unsigned = open(sample_archive(FormatVersion::Basic));
    assert_eq!(unsigned.detect_signature().unwrap(), SignatureStatus::None);
    assert_eq!(unsigned.verify_signature().unwrap(), SignatureStatus::None);

    let mut weak = open(
        ArchiveBuilder::new()
            .add_file("(signature)", vec![0u8; 72])
            .build()
            .unwrap(),
    );
    assert_eq!(weak.detect_signature().unwrap(), SignatureStatus::Weak);
    assert!(matches!(
        weak.verify_signature(),
        Err(ArchiveError::Unsupported(_))
    ));

    let mut bytes = sample_archive(FormatVersion::Basic);
    bytes.extend_from_slice(b"NGIS");
    bytes.extend_from_slice(&[0u8; 256]);
    let mut strong = open(bytes);
    assert_eq!(strong.detect_signature().unwrap(), SignatureStatus::Strong);
    assert!(matches!(
        strong.verify_signature(),
        Err(ArchiveError::Unsupported(_))
    ));
}

fn behind_junk(version: FormatVersion) -> Vec<u8> {
    let mut bytes = vec![0x5A; HEADER_ALIGNMENT as usize];
    bytes.extend_from_slice(&sample_archive(version));
    bytes
}

#[test]
fn overflowing_table_offsets_are_rejected() {
    let header = HEADER_ALIGNMENT as usize;

    let mut hi_block = behind_junk(FormatVersion::ExtendedV1);
    hi_block[header + 0x20..header + 0x28].copy_from_slice(&u64::MAX.to_le_bytes());
    assert!(matches!(
        Archive::open(Cursor::new(hi_block)),
        Err(ArchiveError::InvalidTable {
            table: "hi-block table",
            ..
        })
    ));

    let mut hash = behind_junk(FormatVersion::ExtendedV1);
    hash[header + 0x10..header + 0x14].copy_from_slice(&u32::MAX.to_le_bytes());
    hash[header + 0x28..header + 0x2A].copy_from_slice(&u16::MAX.to_le_bytes());
    assert!(matches!(
        Archive::open(Cursor::new(hash)),
        Err(ArchiveError::InvalidTable {
            table: "hash table",
            ..
        })
    ));
}

#[test]
fn oversized_archive_size_has_no_strong_signature() {
    let header = HEADER_ALIGNMENT as usize;
    let mut bytes = behind_junk(FormatVersion::ExtendedV2);
    bytes[header + 0x2C..header + 0x34].copy_from_slice(&u64::MAX.to_le_bytes());

    let mut archive = open(bytes);
    assert_eq!(archive.header().archive_size64(), u64::MAX);
    assert_eq!(archive.detect_signature().unwrap(), SignatureStatus::None);
    assert_eq!(archive.verify_signature().unwrap(), SignatureStatus::None);
    assert_eq!(
        archive.extract_file("readme.txt").unwrap(),
        Some(b"hello".to_vec())
    );
}
