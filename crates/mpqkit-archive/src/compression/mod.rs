//! Sector compression
//!
//! Blocks flagged with the codec chain prefix every compressed unit with a
//! selector byte. Each bit of the selector names one codec; the writer applies
//! them in [`COMPRESSION_ORDER`] and the reader undoes them in
//! [`DECOMPRESSION_ORDER`]. Both orders are part of the format and are not
//! exact mirrors of each other.
//!
//! Blocks flagged as imploded carry no selector byte and always use the
//! single implode codec.

pub mod adpcm;
pub mod codec;
pub mod huffman;
pub mod implode;

use std::borrow::Cow;
use std::fmt;
use tracing::trace;

use crate::error::{ArchiveError, ArchiveResult};

/// Maximum allowed decompression size (1 GiB)
///
/// Upper bound for any single decoded unit regardless of what the block
/// table declares.
pub const MAX_DECOMPRESSION_SIZE: usize = 1024 * 1024 * 1024;

/// Selector byte of a chained-compression unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CompressionMask(u8);

impl CompressionMask {
    /// Adaptive Huffman coding
    pub const HUFFMAN: u8 = 0x01;
    /// zlib deflate
    pub const DEFLATE: u8 = 0x02;
    /// Sparse run-length coding (not supported)
    pub const SPARSE: u8 = 0x04;
    /// PKWARE DCL implode
    pub const IMPLODE: u8 = 0x08;
    /// bzip2
    pub const BZIP2: u8 = 0x10;
    /// LZMA
    pub const LZMA: u8 = 0x20;
    /// ADPCM, one channel
    pub const ADPCM_MONO: u8 = 0x40;
    /// ADPCM, two channels
    pub const ADPCM_STEREO: u8 = 0x80;

    /// Wrap a selector byte
    pub const fn new(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw selector byte
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether `codec` is part of the chain
    pub const fn has(self, codec: u8) -> bool {
        self.0 & codec == codec
    }

    /// Whether no codec is selected
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for CompressionMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = COMPRESSION_ORDER
            .iter()
            .chain(&[Self::SPARSE])
            .filter(|&&bit| self.has(bit))
            .map(|&bit| codec_name(bit))
            .collect();
        write!(f, "{} (0x{:02X})", names.join("+"), self.0)
    }
}

/// Order in which a writer applies the selected codecs
pub const COMPRESSION_ORDER: [u8; 7] = [
    CompressionMask::HUFFMAN,
    CompressionMask::DEFLATE,
    CompressionMask::IMPLODE,
    CompressionMask::BZIP2,
    CompressionMask::ADPCM_STEREO,
    CompressionMask::ADPCM_MONO,
    CompressionMask::LZMA,
];

/// Order in which a reader undoes the selected codecs
pub const DECOMPRESSION_ORDER: [u8; 7] = [
    CompressionMask::BZIP2,
    CompressionMask::IMPLODE,
    CompressionMask::DEFLATE,
    CompressionMask::HUFFMAN,
    CompressionMask::ADPCM_STEREO,
    CompressionMask::ADPCM_MONO,
    CompressionMask::LZMA,
];

fn codec_name(bit: u8) -> &'static str {
    match bit {
        CompressionMask::HUFFMAN => "huffman",
        CompressionMask::DEFLATE => "deflate",
        CompressionMask::SPARSE => "sparse",
        CompressionMask::IMPLODE => "implode",
        CompressionMask::BZIP2 => "bzip2",
        CompressionMask::LZMA => "lzma",
        CompressionMask::ADPCM_MONO => "adpcm-mono",
        CompressionMask::ADPCM_STEREO => "adpcm-stereo",
        _ => "unknown",
    }
}

/// How a block's compressed units are encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitCodec {
    /// Implode only, no selector byte
    Imploded,
    /// Selector byte followed by chained codecs
    Chained,
}

/// Decode one compressed unit into at most `expected` bytes
pub fn decompress(data: &[u8], expected: usize, codec: UnitCodec) -> ArchiveResult<Vec<u8>> {
    let limit = expected.min(MAX_DECOMPRESSION_SIZE);
    match codec {
        UnitCodec::Imploded => implode::explode(data, limit),
        UnitCodec::Chained => decompress_chain(data, limit),
    }
}

/// Decode a selector byte and its chained payload
pub fn decompress_chain(data: &[u8], expected: usize) -> ArchiveResult<Vec<u8>> {
    let (&selector, payload) = data
        .split_first()
        .ok_or_else(|| ArchiveError::Decompression("empty compressed unit".to_string()))?;
    let mask = CompressionMask::new(selector);

    if mask.has(CompressionMask::SPARSE) {
        return Err(ArchiveError::Unsupported(format!(
            "sparse compression in chain {mask}"
        )));
    }
    trace!("decompressing {} bytes with {mask}", payload.len());

    let mut buffer = Cow::Borrowed(payload);
    for bit in DECOMPRESSION_ORDER {
        if mask.has(bit) {
            buffer = Cow::Owned(decode_step(bit, &buffer, expected)?);
        }
    }
    Ok(buffer.into_owned())
}

fn decode_step(bit: u8, input: &[u8], expected: usize) -> ArchiveResult<Vec<u8>> {
    match bit {
        CompressionMask::BZIP2 => codec::bunzip2(input, expected),
        CompressionMask::IMPLODE => implode::explode(input, expected),
        CompressionMask::DEFLATE => codec::inflate(input, expected),
        CompressionMask::HUFFMAN => huffman::decompress(input, expected),
        CompressionMask::ADPCM_STEREO => adpcm::decompress(input, 2, expected),
        CompressionMask::ADPCM_MONO => adpcm::decompress(input, 1, expected),
        CompressionMask::LZMA => codec::lzma_decompress(input, expected),
        other => Err(ArchiveError::Unsupported(format!(
            "{} decompression",
            codec_name(other)
        ))),
    }
}

/// Encode a unit with the selected codecs and prefix the selector byte
///
/// Huffman, deflate and bzip2 can be chained. LZMA must stand alone. ADPCM
/// and implode cannot be written.
pub fn compress_chain(data: &[u8], mask: CompressionMask) -> ArchiveResult<Vec<u8>> {
    const WRITABLE: u8 = CompressionMask::HUFFMAN
        | CompressionMask::DEFLATE
        | CompressionMask::BZIP2
        | CompressionMask::LZMA;

    if mask.bits() & !WRITABLE != 0 {
        return Err(ArchiveError::Unsupported(format!("{mask} compression")));
    }
    if mask.has(CompressionMask::LZMA) && mask.bits() != CompressionMask::LZMA {
        return Err(ArchiveError::InvalidInput(format!(
            "lzma cannot be chained with other codecs ({mask})"
        )));
    }

    let mut buffer = Cow::Borrowed(data);
    for bit in COMPRESSION_ORDER {
        if !mask.has(bit) {
            continue;
        }
        let encoded = match bit {
            CompressionMask::HUFFMAN => huffman::compress(&buffer, huffman::DEFAULT_TABLE)?,
            CompressionMask::DEFLATE => codec::deflate(&buffer)?,
            CompressionMask::BZIP2 => codec::bzip2(&buffer)?,
            _ => codec::lzma_compress(&buffer)?,
        };
        buffer = Cow::Owned(encoded);
    }

    let mut unit = Vec::with_capacity(buffer.len() + 1);
    unit.push(mask.bits());
    unit.extend_from_slice(&buffer);
    Ok(unit)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TEXT: &[u8] =
        b"The quick brown fox jumps over the lazy dog. The quick brown fox jumps again.";

    #[test]
    fn test_orders_cover_same_codecs() {
        let mut compress = COMPRESSION_ORDER;
        let mut decompress = DECOMPRESSION_ORDER;
        compress.sort_unstable();
        decompress.sort_unstable();
        assert_eq!(compress, decompress);
        assert!(!COMPRESSION_ORDER.contains(&CompressionMask::SPARSE));
    }

    #[test]
    fn test_deflate_then_bzip2() {
        let mask = CompressionMask::new(0x12);
        let unit = compress_chain(TEXT, mask).expect("compress");
        assert_eq!(unit[0], 0x12);
        // Outermost layer is bzip2
        assert_eq!(&unit[1..4], b"BZh");

        let decoded = decompress(&unit, TEXT.len(), UnitCodec::Chained).expect("decompress");
        assert_eq!(decoded, TEXT);
    }

    #[test]
    fn test_single_codecs() {
        for bits in [
            CompressionMask::HUFFMAN,
            CompressionMask::DEFLATE,
            CompressionMask::BZIP2,
            CompressionMask::LZMA,
        ] {
            let unit = compress_chain(TEXT, CompressionMask::new(bits)).expect("compress");
            let decoded = decompress_chain(&unit, TEXT.len()).expect("decompress");
            assert_eq!(decoded, TEXT, "codec 0x{bits:02X}");
        }
    }

    #[test]
    fn test_huffman_then_deflate() {
        let mask = CompressionMask::new(CompressionMask::HUFFMAN | CompressionMask::DEFLATE);
        let unit = compress_chain(TEXT, mask).expect("compress");
        let decoded = decompress_chain(&unit, TEXT.len()).expect("decompress");
        assert_eq!(decoded, TEXT);
    }

    #[test]
    fn test_huffman_wrapped_adpcm() {
        // Zero initial samples followed by 64 zero code bytes
        let mut mono = vec![0, 6, 0, 0];
        mono.extend_from_slice(&[0; 64]);
        let mut stereo = vec![0, 6, 0, 0, 0, 0];
        stereo.extend_from_slice(&[0; 64]);

        for (selector, channels, stream) in [(0x41u8, 1, mono), (0x81, 2, stereo)] {
            let expected = adpcm::decompress(&stream, channels, 4096).expect("adpcm");
            let mut unit = vec![selector];
            unit.extend(huffman::compress(&stream, huffman::DEFAULT_TABLE).expect("huffman"));

            let decoded = decompress_chain(&unit, expected.len()).expect("decompress");
            assert_eq!(decoded, expected, "selector 0x{selector:02X}");
        }
    }

    #[test]
    fn test_empty_selector_is_passthrough() {
        assert_eq!(decompress_chain(&[0, 1, 2, 3], 3).expect("decode"), vec![1, 2, 3]);
    }

    #[test]
    fn test_unsupported_codecs() {
        assert!(matches!(
            decompress_chain(&[CompressionMask::SPARSE, 0], 1),
            Err(ArchiveError::Unsupported(_))
        ));
        assert!(matches!(
            decompress_chain(&[CompressionMask::HUFFMAN, 0x05, 0], 1),
            Err(ArchiveError::Unsupported(_))
        ));
        assert!(matches!(
            compress_chain(TEXT, CompressionMask::new(CompressionMask::IMPLODE)),
            Err(ArchiveError::Unsupported(_))
        ));
        assert!(matches!(
            compress_chain(TEXT, CompressionMask::new(0x22)),
            Err(ArchiveError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_empty_unit() {
        assert!(matches!(
            decompress(&[], 10, UnitCodec::Chained),
            Err(ArchiveError::Decompression(_))
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(CompressionMask::new(0).to_string(), "none");
        assert_eq!(
            CompressionMask::new(0x12).to_string(),
            "deflate+bzip2 (0x12)"
        );
        assert_eq!(
            CompressionMask::new(0x41).to_string(),
            "huffman+adpcm-mono (0x41)"
        );
    }
}
