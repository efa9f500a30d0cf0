//! Audio handling for the bridge.
//!
//! - `transcoder`: 16kHz ⇄ 8kHz conversion and carrier chunk shaping
//! - `amplifier`: optional noise gate + gain for backend audio

pub mod amplifier;
pub mod transcoder;

use thiserror::Error;

pub use amplifier::{Amplified, AmplifierConfig, amplify};
pub use transcoder::{
    BACKEND_SAMPLE_RATE, CARRIER_SAMPLE_RATE, CHUNK_MULTIPLE_BYTES, ChunkIter,
    MAX_ALIGNED_CHUNK_BYTES, MAX_CHUNK_BYTES, MIN_CHUNK_BYTES, decode_carrier_payload, downsample,
    encode_carrier_payload, is_valid_chunk_size, shape_chunk, split_into_chunks, upsample,
};

/// Errors surfaced by audio helpers to their immediate caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AudioError {
    /// A carrier media payload was not valid base64
    #[error("Invalid audio payload: {0}")]
    InvalidPayload(String),
}

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;
