//! Noise gate and gain stage for backend audio headed to the carrier.

use serde::{Deserialize, Serialize};

use super::transcoder::BYTES_PER_SAMPLE;

/// Samples with a magnitude below this are forced to zero.
pub const DEFAULT_NOISE_FLOOR: i16 = 10;

/// Default linear gain.
pub const DEFAULT_GAIN: f32 = 50.0;

/// Default ceiling as a fraction of `i16::MAX`.
pub const DEFAULT_CEILING_RATIO: f32 = 0.8;

/// Amplification settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmplifierConfig {
    /// Whether amplification runs at all. Default: false
    pub enabled: bool,
    /// Linear gain applied above the noise floor. Default: 50.0
    pub gain: f32,
    /// Symmetric clamp ceiling as a fraction of `i16::MAX`. Default: 0.8
    pub ceiling_ratio: f32,
    /// Noise gate threshold in sample units. Default: 10
    pub noise_floor: i16,
}

impl Default for AmplifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gain: DEFAULT_GAIN,
            ceiling_ratio: DEFAULT_CEILING_RATIO,
            noise_floor: DEFAULT_NOISE_FLOOR,
        }
    }
}

impl AmplifierConfig {
    /// Absolute clamp value in sample units.
    pub fn ceiling(&self) -> i32 {
        (f32::from(i16::MAX) * self.ceiling_ratio.clamp(0.0, 1.0)) as i32
    }
}

/// Result of amplifying one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Amplified {
    /// Amplified PCM, same length as the input (minus any odd trailing byte)
    pub pcm: Vec<u8>,
    /// Number of samples that hit the ceiling
    pub clipped: u64,
}

/// Apply the noise gate and gain to a little-endian PCM frame.
///
/// Runs regardless of `config.enabled`; callers decide whether to apply it.
pub fn amplify(pcm: &[u8], config: &AmplifierConfig) -> Amplified {
    let ceiling = config.ceiling();
    let floor = i32::from(config.noise_floor);
    let mut out = Vec::with_capacity(pcm.len() - pcm.len() % BYTES_PER_SAMPLE);
    let mut clipped = 0u64;

    for c in pcm.chunks_exact(BYTES_PER_SAMPLE) {
        let sample = i32::from(i16::from_le_bytes([c[0], c[1]]));

        let value = if sample.abs() < floor {
            0
        } else {
            let scaled = (sample as f32 * config.gain) as i32;
            if scaled > ceiling {
                clipped += 1;
                ceiling
            } else if scaled < -ceiling {
                clipped += 1;
                -ceiling
            } else {
                scaled
            }
        };

        out.extend_from_slice(&(value as i16).to_le_bytes());
    }

    Amplified { pcm: out, clipped }
}
