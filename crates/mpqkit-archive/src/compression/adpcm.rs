//! IMA-style ADPCM decoder for 16-bit mono and stereo sound
//!
//! Stream layout: one unused byte, one bit-shift byte, one initial `i16`
//! sample per channel, then one byte per sample. Channels are interleaved.
//! Bytes with the high bit set are control codes rather than samples.

use crate::error::{ArchiveError, ArchiveResult};

const INITIAL_STEP_INDEX: usize = 0x2C;
const MAX_STEP_INDEX: usize = 0x58;

const STEP_SIZES: [i32; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66,
    73, 80, 88, 97, 107, 118, 130, 143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408,
    449, 494, 544, 598, 658, 724, 796, 876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066,
    2272, 2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358, 5894, 6484, 7132, 7845, 8630,
    9493, 10442, 11487, 12635, 13899, 15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794,
    32767,
];

const NEXT_STEP: [i32; 32] = [
    -1, 0, -1, 4, -1, 2, -1, 6, -1, 1, -1, 5, -1, 3, -1, 7, -1, 1, -1, 5, -1, 3, -1, 7, -1, 2, -1,
    4, -1, 6, -1, 8,
];

/// Decode up to `expected` bytes of 16-bit little-endian samples
pub fn decompress(data: &[u8], channels: usize, expected: usize) -> ArchiveResult<Vec<u8>> {
    if !(1..=2).contains(&channels) {
        return Err(ArchiveError::Decompression(format!(
            "adpcm: {channels} channels"
        )));
    }

    let truncated = || ArchiveError::Decompression("adpcm: truncated stream".to_string());
    let [_, shift, rest @ ..] = data else {
        return Err(truncated());
    };
    let shift = u32::from(*shift);
    if rest.len() < channels * 2 {
        return Err(truncated());
    }
    let (initial, codes) = rest.split_at(channels * 2);

    let mut output = SampleSink::new(expected);
    let mut predicted = [0i32; 2];
    let mut step_index = [INITIAL_STEP_INDEX; 2];

    for (channel, pair) in initial.chunks_exact(2).enumerate() {
        predicted[channel] = i32::from(i16::from_le_bytes([pair[0], pair[1]]));
        if !output.push(predicted[channel]) {
            return Ok(output.into_inner());
        }
    }

    let mut channel = channels - 1;
    for &code in codes {
        channel = (channel + 1) % channels;

        if code & 0x80 != 0 {
            match code & 0x7F {
                0 => {
                    step_index[channel] = step_index[channel].saturating_sub(1);
                    if !output.push(predicted[channel]) {
                        break;
                    }
                }
                1 => {
                    step_index[channel] = (step_index[channel] + 8).min(MAX_STEP_INDEX);
                    channel = (channel + 1) % channels;
                }
                2 => {}
                _ => channel = (channel + 1) % channels,
            }
            continue;
        }

        let step = STEP_SIZES[step_index[channel]];
        predicted[channel] = decode_sample(
            predicted[channel],
            code,
            step,
            step.checked_shr(shift).unwrap_or(0),
        );
        if !output.push(predicted[channel]) {
            break;
        }
        step_index[channel] = next_step_index(step_index[channel], code);
    }

    Ok(output.into_inner())
}

fn decode_sample(predicted: i32, code: u8, step: i32, base: i32) -> i32 {
    let difference = (0u32..6)
        .filter(|bit| code & (1 << bit) != 0)
        .fold(base, |sum, bit| sum + (step >> bit));

    if code & 0x40 != 0 {
        (predicted - difference).max(i32::from(i16::MIN))
    } else {
        (predicted + difference).min(i32::from(i16::MAX))
    }
}

fn next_step_index(index: usize, code: u8) -> usize {
    let next = index as i32 + NEXT_STEP[usize::from(code & 0x1F)];
    next.clamp(0, MAX_STEP_INDEX as i32) as usize
}

/// Output buffer that stops accepting samples at a byte limit
struct SampleSink {
    bytes: Vec<u8>,
    limit: usize,
}

impl SampleSink {
    fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(limit),
            limit,
        }
    }

    /// Append a sample; false once the limit is reached
    fn push(&mut self, sample: i32) -> bool {
        if self.bytes.len() + 2 > self.limit {
            return false;
        }
        let sample = sample.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
        self.bytes.extend_from_slice(&sample.to_le_bytes());
        true
    }

    fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}
