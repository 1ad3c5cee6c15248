//! PKWARE DCL "explode" decoder
//!
//! Stream layout: `u8 mode`, `u8 dictionary_bits` (4..=6), then an LSB-first
//! bit stream of literals and back-references ending in a dedicated
//! end-of-stream length code. Binary mode stores literals as raw bytes; ASCII
//! mode Huffman-codes them with a fixed table.

use crate::error::{ArchiveError, ArchiveResult};

const MODE_BINARY: u8 = 0;
const MODE_ASCII: u8 = 1;

/// Length value that terminates the stream
const END_OF_STREAM: u32 = 0x205;

const LEN_BITS: [u8; 16] = [3, 2, 3, 3, 4, 4, 4, 5, 5, 5, 5, 6, 6, 6, 7, 7];
const LEN_CODES: [u8; 16] = [
    0x05, 0x03, 0x01, 0x06, 0x0A, 0x02, 0x0C, 0x14, 0x04, 0x18, 0x08, 0x30, 0x10, 0x20, 0x40, 0x00,
];
const EXTRA_LEN_BITS: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8];
const LEN_BASE: [u16; 16] = [
    0x000, 0x001, 0x002, 0x003, 0x004, 0x005, 0x006, 0x007, 0x008, 0x00A, 0x00E, 0x016, 0x026,
    0x046, 0x086, 0x106,
];

const DIST_BITS: [u8; 64] = [
    2, 4, 4, 5, 5, 5, 5, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8,
    8, 8,
];
const DIST_CODES: [u8; 64] = [
    0x03, 0x0D, 0x05, 0x19, 0x09, 0x11, 0x01, 0x3E, 0x1E, 0x2E, 0x0E, 0x36, 0x16, 0x26, 0x06, 0x3A,
    0x1A, 0x2A, 0x0A, 0x32, 0x12, 0x22, 0x42, 0x02, 0x7C, 0x3C, 0x5C, 0x1C, 0x6C, 0x2C, 0x4C, 0x0C,
    0x74, 0x34, 0x54, 0x14, 0x64, 0x24, 0x44, 0x04, 0x78, 0x38, 0x58, 0x18, 0x68, 0x28, 0x48, 0x08,
    0xF0, 0x70, 0xB0, 0x30, 0xD0, 0x50, 0x90, 0x10, 0xE0, 0x60, 0xA0, 0x20, 0xC0, 0x40, 0x80, 0x00,
];

const MAX_LITERAL_BITS: usize = 13;

/// Code length of every literal in ASCII mode
#[rustfmt::skip]
const ASCII_LITERAL_BITS: [u8; 256] = [
    11, 12, 12, 12, 12, 12, 12, 12, 12,  8,  7, 12, 12,  7, 12, 12,
    12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 13, 12, 12, 12, 12, 12,
     4, 10,  8, 12, 10, 12, 10,  8,  7,  7,  8,  9,  7,  6,  7,  8,
     7,  6,  7,  7,  7,  7,  8,  7,  7,  8,  8, 12, 11,  7,  9, 11,
    12,  6,  7,  6,  6,  5,  7,  8,  8,  6, 11,  9,  6,  7,  6,  6,
     7, 11,  6,  6,  6,  7,  9,  8,  9,  9, 11,  8, 11,  9, 12,  8,
    12,  5,  6,  6,  6,  5,  6,  6,  6,  5, 11,  7,  5,  6,  5,  5,
     6, 10,  5,  5,  5,  5,  8,  7,  8,  8, 10, 11, 11, 12, 12, 12,
    13, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13,
    13, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13,
    13, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13,
    12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12,
    12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12,
    12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12,
    13, 12, 13, 13, 13, 12, 13, 13, 13, 12, 13, 13, 13, 13, 12, 13,
    13, 13, 12, 12, 12, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13, 13,
];

/// ASCII-mode literal decoder
static ASCII_LITERALS: LiteralCode = LiteralCode::canonical(&ASCII_LITERAL_BITS);

/// Canonical prefix code over byte values, stored with inverted bits
///
/// Codes are assigned in order of length, then byte value. The stream holds
/// each code most significant bit first with every bit inverted.
struct LiteralCode {
    /// Number of codes of each length
    counts: [u16; MAX_LITERAL_BITS + 1],
    /// Byte values ordered by code
    symbols: [u8; 256],
}

impl LiteralCode {
    const fn canonical(lengths: &[u8; 256]) -> Self {
        let mut counts = [0u16; MAX_LITERAL_BITS + 1];
        let mut byte = 0;
        while byte < 256 {
            counts[lengths[byte] as usize] += 1;
            byte += 1;
        }

        let mut next = [0u16; MAX_LITERAL_BITS + 1];
        let mut length = 1;
        while length < MAX_LITERAL_BITS {
            next[length + 1] = next[length] + counts[length];
            length += 1;
        }

        let mut symbols = [0u8; 256];
        byte = 0;
        while byte < 256 {
            let length = lengths[byte] as usize;
            symbols[next[length] as usize] = byte as u8;
            next[length] += 1;
            byte += 1;
        }
        Self { counts, symbols }
    }

    fn decode(&self, bits: &mut BitReader<'_>) -> ArchiveResult<u8> {
        let mut code = 0u32;
        let mut first = 0u32;
        let mut index = 0u32;
        for &count in &self.counts[1..] {
            code |= bits.read(1)? ^ 1;
            let count = u32::from(count);
            if let Some(offset) = code.checked_sub(first)
                && offset < count
            {
                return Ok(self.symbols[(index + offset) as usize]);
            }
            index += count;
            first = (first + count) << 1;
            code <<= 1;
        }
        Err(ArchiveError::Decompression(
            "implode: invalid literal code".to_string(),
        ))
    }
}

/// Maps the next 8 stream bits to a length-code index
const LENGTH_DECODE: [u8; 256] = build_decode_table(&LEN_CODES, &LEN_BITS);

/// Maps the next 8 stream bits to a distance-code index
const DISTANCE_DECODE: [u8; 256] = build_decode_table(&DIST_CODES, &DIST_BITS);

const fn build_decode_table<const N: usize>(codes: &[u8; N], bits: &[u8; N]) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut index = 0;
    while index < N {
        let step = 1usize << bits[index];
        let mut code = codes[index] as usize;
        while code < 256 {
            table[code] = index as u8;
            code += step;
        }
        index += 1;
    }
    table
}

/// LSB-first bit reader; peeking past the end yields zero bits
struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn peek(&self, count: u32) -> u32 {
        let mut value = 0;
        for offset in 0..count {
            let bit = self.position + offset as usize;
            let byte = self.data.get(bit / 8).copied().unwrap_or(0);
            value |= u32::from((byte >> (bit % 8)) & 1) << offset;
        }
        value
    }

    fn consume(&mut self, count: u32) -> ArchiveResult<()> {
        let end = self.position + count as usize;
        if end > self.data.len() * 8 {
            return Err(ArchiveError::Decompression(
                "implode: stream ended without an end marker".to_string(),
            ));
        }
        self.position = end;
        Ok(())
    }

    fn read(&mut self, count: u32) -> ArchiveResult<u32> {
        let value = self.peek(count);
        self.consume(count)?;
        Ok(value)
    }
}

/// Decode an imploded buffer into at most `expected` bytes
pub fn explode(data: &[u8], expected: usize) -> ArchiveResult<Vec<u8>> {
    let [mode, dictionary_bits, stream @ ..] = data else {
        return Err(ArchiveError::Decompression(
            "implode: stream shorter than its header".to_string(),
        ));
    };

    let ascii = match *mode {
        MODE_BINARY => false,
        MODE_ASCII => true,
        other => {
            return Err(ArchiveError::Decompression(format!(
                "implode: unknown mode {other}"
            )));
        }
    };
    if !(4..=6).contains(dictionary_bits) {
        return Err(ArchiveError::Decompression(format!(
            "implode: dictionary size of {dictionary_bits} bits"
        )));
    }
    let dictionary_bits = u32::from(*dictionary_bits);

    let mut bits = BitReader::new(stream);
    let mut output = Vec::with_capacity(expected);

    while output.len() < expected {
        if bits.read(1)? == 0 {
            let literal = if ascii {
                ASCII_LITERALS.decode(&mut bits)?
            } else {
                bits.read(8)? as u8
            };
            output.push(literal);
            continue;
        }

        let length_index = usize::from(LENGTH_DECODE[bits.peek(8) as usize]);
        bits.consume(u32::from(LEN_BITS[length_index]))?;
        let extra = bits.read(u32::from(EXTRA_LEN_BITS[length_index]))?;
        let length = u32::from(LEN_BASE[length_index]) + extra;
        if length == END_OF_STREAM {
            break;
        }
        let repeat = length as usize + 2;

        let distance_index = DISTANCE_DECODE[bits.peek(8) as usize];
        bits.consume(u32::from(DIST_BITS[usize::from(distance_index)]))?;
        let low_bits = if repeat == 2 { 2 } else { dictionary_bits };
        let distance =
            ((u32::from(distance_index) << low_bits) | bits.read(low_bits)?) as usize + 1;

        if distance > output.len() {
            return Err(ArchiveError::Decompression(format!(
                "implode: distance {distance} reaches before the start of {} bytes",
                output.len()
            )));
        }

        // Byte-wise copy: source and destination may overlap
        let start = output.len() - distance;
        for offset in 0..repeat {
            if output.len() >= expected {
                break;
            }
            let byte = output[start + offset];
            output.push(byte);
        }
    }

    Ok(output)
}
