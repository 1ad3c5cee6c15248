//! Stream codecs backed by external crates: zlib, bzip2 and LZMA

use bzip2::read::{BzDecoder, BzEncoder};
use flate2::Compression;
use flate2::read::{ZlibDecoder, ZlibEncoder};
use std::io::{self, Read, Write};

use crate::error::{ArchiveError, ArchiveResult};

/// First byte of an LZMA payload; only the "no filter" value is defined
const LZMA_FILTER_NONE: u8 = 0;

/// Inflate a zlib stream, refusing to produce more than `limit` bytes
pub fn inflate(data: &[u8], limit: usize) -> ArchiveResult<Vec<u8>> {
    read_limited(ZlibDecoder::new(data), limit, "zlib")
}

/// Deflate into a zlib stream
pub fn deflate(data: &[u8]) -> ArchiveResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(data, Compression::default());
    let mut compressed = Vec::new();
    encoder
        .read_to_end(&mut compressed)
        .map_err(|e| ArchiveError::Compression(format!("zlib: {e}")))?;
    Ok(compressed)
}

/// Decompress a bzip2 stream, refusing to produce more than `limit` bytes
pub fn bunzip2(data: &[u8], limit: usize) -> ArchiveResult<Vec<u8>> {
    read_limited(BzDecoder::new(data), limit, "bzip2")
}

/// Compress into a bzip2 stream
pub fn bzip2(data: &[u8]) -> ArchiveResult<Vec<u8>> {
    let mut encoder = BzEncoder::new(data, bzip2::Compression::default());
    let mut compressed = Vec::new();
    encoder
        .read_to_end(&mut compressed)
        .map_err(|e| ArchiveError::Compression(format!("bzip2: {e}")))?;
    Ok(compressed)
}

/// Decompress a filter byte followed by an LZMA-alone stream
pub fn lzma_decompress(data: &[u8], limit: usize) -> ArchiveResult<Vec<u8>> {
    let (&filter, mut stream) = data
        .split_first()
        .ok_or_else(|| ArchiveError::Decompression("lzma: empty payload".to_string()))?;
    if filter != LZMA_FILTER_NONE {
        return Err(ArchiveError::Decompression(format!(
            "lzma: unknown filter {filter:#04x}"
        )));
    }

    let mut output = LimitedWriter::new(limit);
    lzma_rs::lzma_decompress(&mut stream, &mut output)
        .map_err(|e| ArchiveError::Decompression(format!("lzma: {e}")))?;
    Ok(output.into_inner())
}

/// Compress into a filter byte followed by an LZMA-alone stream
pub fn lzma_compress(data: &[u8]) -> ArchiveResult<Vec<u8>> {
    let mut output = vec![LZMA_FILTER_NONE];
    let mut input = data;
    lzma_rs::lzma_compress(&mut input, &mut output)
        .map_err(|e| ArchiveError::Compression(format!("lzma: {e}")))?;
    Ok(output)
}

fn read_limited<R: Read>(mut reader: R, limit: usize, codec: &str) -> ArchiveResult<Vec<u8>> {
    let mut output = Vec::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|e| ArchiveError::Decompression(format!("{codec}: {e}")))?;
        if read == 0 {
            break;
        }
        if output.len() + read > limit {
            return Err(ArchiveError::Decompression(format!(
                "{codec}: output exceeds {limit} bytes"
            )));
        }
        output.extend_from_slice(&buffer[..read]);
    }
    Ok(output)
}

/// Sink that fails once more than `limit` bytes are written
struct LimitedWriter {
    buffer: Vec<u8>,
    limit: usize,
}

impl LimitedWriter {
    fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
        }
    }

    fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

impl Write for LimitedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.buffer.len() + buf.len() > self.limit {
            return Err(io::Error::other(format!(
                "output exceeds {} bytes",
                self.limit
            )));
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
