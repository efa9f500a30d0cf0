//! Sample-rate conversion and chunk shaping between backend and carrier PCM.
//!
//! Both sides carry signed 16-bit little-endian mono PCM:
//!
//! - Backend: 16000 Hz, raw binary frames
//! - Carrier: 8000 Hz, base64 inside JSON media events
//!
//! Conversion is deliberately naive (decimation and zero-order hold). Every
//! function here is pure and never fails on truncated input: a trailing odd
//! byte is ignored and empty input produces empty output.

use std::borrow::Cow;

use base64::prelude::*;

use super::AudioError;

/// Backend sample rate in Hz.
pub const BACKEND_SAMPLE_RATE: u32 = 16_000;

/// Carrier sample rate in Hz.
pub const CARRIER_SAMPLE_RATE: u32 = 8_000;

/// Bytes per PCM sample (16-bit).
pub const BYTES_PER_SAMPLE: usize = 2;

/// Smallest chunk the carrier accepts (1600 samples, 200ms at 8kHz).
pub const MIN_CHUNK_BYTES: usize = 3_200;

/// Largest chunk the carrier accepts.
pub const MAX_CHUNK_BYTES: usize = 100_000;

/// Every chunk length must be a multiple of this (20ms at 8kHz).
pub const CHUNK_MULTIPLE_BYTES: usize = 320;

/// Largest length that satisfies both the maximum and the multiple rule.
pub const MAX_ALIGNED_CHUNK_BYTES: usize = MAX_CHUNK_BYTES - (MAX_CHUNK_BYTES % CHUNK_MULTIPLE_BYTES);

/// Decimate 16kHz PCM to 8kHz by keeping samples 0, 2, 4, ...
///
/// The output holds `floor(samples / 2)` samples.
pub fn downsample(backend_frame: &[u8]) -> Vec<u8> {
    let samples = backend_frame.len() / BYTES_PER_SAMPLE;
    let mut out = Vec::with_capacity((samples / 2) * BYTES_PER_SAMPLE);

    for pair in backend_frame.chunks_exact(BYTES_PER_SAMPLE * 2) {
        out.extend_from_slice(&pair[..BYTES_PER_SAMPLE]);
    }

    out
}

/// Upsample 8kHz PCM to 16kHz by duplicating every sample.
///
/// `downsample(&upsample(f)) == f` holds for any whole-sample frame `f`.
pub fn upsample(carrier_frame: &[u8]) -> Vec<u8> {
    let samples = carrier_frame.len() / BYTES_PER_SAMPLE;
    let mut out = Vec::with_capacity(samples * 2 * BYTES_PER_SAMPLE);

    for sample in carrier_frame.chunks_exact(BYTES_PER_SAMPLE) {
        out.extend_from_slice(sample);
        out.extend_from_slice(sample);
    }

    out
}

/// Returns true if `len` bytes is an acceptable carrier chunk size.
#[inline]
pub fn is_valid_chunk_size(len: usize) -> bool {
    (MIN_CHUNK_BYTES..=MAX_CHUNK_BYTES).contains(&len) && len % CHUNK_MULTIPLE_BYTES == 0
}

/// Force a frame into the carrier's chunk constraints.
///
/// - shorter than [`MIN_CHUNK_BYTES`]: zero-padded at the tail
/// - longer than [`MAX_ALIGNED_CHUNK_BYTES`]: truncated
/// - otherwise: zero-padded up to the next multiple of [`CHUNK_MULTIPLE_BYTES`]
///
/// A frame that is already valid is borrowed back unchanged. Empty input
/// stays empty.
pub fn shape_chunk(frame: &[u8]) -> Cow<'_, [u8]> {
    if frame.is_empty() || is_valid_chunk_size(frame.len()) {
        return Cow::Borrowed(frame);
    }

    if frame.len() > MAX_ALIGNED_CHUNK_BYTES {
        return Cow::Borrowed(&frame[..MAX_ALIGNED_CHUNK_BYTES]);
    }

    let target = frame
        .len()
        .max(MIN_CHUNK_BYTES)
        .next_multiple_of(CHUNK_MULTIPLE_BYTES);

    let mut padded = Vec::with_capacity(target);
    padded.extend_from_slice(frame);
    padded.resize(target, 0);
    Cow::Owned(padded)
}

/// Split an arbitrarily large frame into shaped carrier chunks.
///
/// Each piece covers at most [`MAX_ALIGNED_CHUNK_BYTES`] of input and is run
/// through [`shape_chunk`]. The iterator is `Clone`, so it can be restarted.
pub fn split_into_chunks(frame: &[u8]) -> ChunkIter<'_> {
    ChunkIter {
        remaining: frame,
    }
}

/// Iterator returned by [`split_into_chunks`].
#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = Cow<'a, [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }

        let take = self.remaining.len().min(MAX_ALIGNED_CHUNK_BYTES);
        let (piece, rest) = self.remaining.split_at(take);
        self.remaining = rest;
        Some(shape_chunk(piece))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining.len().div_ceil(MAX_ALIGNED_CHUNK_BYTES);
        (n, Some(n))
    }
}

impl ExactSizeIterator for ChunkIter<'_> {}

/// Base64-encode a carrier frame for a media event payload.
pub fn encode_carrier_payload(frame: &[u8]) -> String {
    BASE64_STANDARD.encode(frame)
}

/// Decode a carrier media payload back into raw 8kHz PCM.
pub fn decode_carrier_payload(payload: &str) -> Result<Vec<u8>, AudioError> {
    BASE64_STANDARD
        .decode(payload.trim())
        .map_err(|e| AudioError::InvalidPayload(e.to_string()))
}

/// Read a PCM buffer as samples; a trailing odd byte is ignored.
pub fn pcm_to_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(BYTES_PER_SAMPLE)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Serialize samples as little-endian PCM.
pub fn samples_to_pcm(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}
