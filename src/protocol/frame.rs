//! Inbound PCM validation
//!
//! Microphone audio reaches transcription only through [`FrameValidator`].
//! A rejected frame is dropped on its own; the connection carries on.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::AudioConfig;

pub const SUPPORTED_SAMPLE_RATES: [u32; 3] = [16_000, 44_100, 48_000];

const MAX_CHANNELS: u16 = 2;

/// Layout a client declares for its audio. Clients that declare nothing get
/// 16 kHz mono signed 16-bit little-endian.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFormat {
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_channels() -> u16 {
    1
}

fn default_format() -> String {
    "s16le".to_string()
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: default_channels(),
            format: default_format(),
        }
    }
}

impl FrameFormat {
    /// Bytes per sample frame (all channels)
    pub fn block_align(&self) -> usize {
        2 * self.channels as usize
    }
}

fn is_pcm16(format: &str) -> bool {
    matches!(
        format.to_ascii_lowercase().as_str(),
        "s16le" | "pcm_s16le" | "pcm16" | "int16" | "s16"
    )
}

#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub format: FrameFormat,
    pub payload: Bytes,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FrameValidationError {
    #[error("Unsupported sample rate {0} Hz (expected 16000, 44100 or 48000)")]
    UnsupportedSampleRate(u32),

    #[error("Unsupported sample format '{0}' (expected 16-bit PCM)")]
    UnsupportedFormat(String),

    #[error("Unsupported channel count {0}")]
    UnsupportedChannels(u16),

    #[error("Empty audio frame")]
    Empty,

    #[error("Payload of {len} bytes is not a multiple of {block_align}")]
    Misaligned { len: usize, block_align: usize },

    #[error("Frame is silent (RMS {rms:.4})")]
    Silent { rms: f32 },

    #[error("Frame is saturated (RMS {rms:.4})")]
    Saturated { rms: f32 },

    #[error("Invalid payload encoding: {0}")]
    Encoding(String),
}

impl FrameValidationError {
    /// Stable code reported to the sender
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedSampleRate(_) => "unsupported_sample_rate",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::UnsupportedChannels(_) => "unsupported_channels",
            Self::Empty => "empty_frame",
            Self::Misaligned { .. } => "misaligned",
            Self::Silent { .. } => "silent",
            Self::Saturated { .. } => "saturated",
            Self::Encoding(_) => "invalid_encoding",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    /// Samples per channel
    pub samples: usize,
    pub rms: f32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct FrameValidator {
    min_rms: f32,
    max_rms: f32,
}

impl FrameValidator {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            min_rms: config.min_rms,
            max_rms: config.max_rms,
        }
    }

    pub fn validate(&self, frame: &AudioFrame) -> Result<FrameStats, FrameValidationError> {
        let format = &frame.format;

        if !SUPPORTED_SAMPLE_RATES.contains(&format.sample_rate) {
            return Err(FrameValidationError::UnsupportedSampleRate(format.sample_rate));
        }
        if !is_pcm16(&format.format) {
            return Err(FrameValidationError::UnsupportedFormat(format.format.clone()));
        }
        if format.channels == 0 || format.channels > MAX_CHANNELS {
            return Err(FrameValidationError::UnsupportedChannels(format.channels));
        }
        if frame.payload.is_empty() {
            return Err(FrameValidationError::Empty);
        }

        let block_align = format.block_align();
        if frame.payload.len() % block_align != 0 {
            return Err(FrameValidationError::Misaligned {
                len: frame.payload.len(),
                block_align,
            });
        }

        let rms = rms(&frame.payload);
        if rms <= self.min_rms {
            return Err(FrameValidationError::Silent { rms });
        }
        if rms >= self.max_rms {
            return Err(FrameValidationError::Saturated { rms });
        }

        let samples = frame.payload.len() / block_align;
        Ok(FrameStats {
            samples,
            rms,
            duration_ms: samples as u64 * 1000 / format.sample_rate as u64,
        })
    }
}

/// Root mean square of s16le samples, scaled to 0.0..=1.0
pub fn rms(pcm: &[u8]) -> f32 {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for pair in pcm.chunks_exact(2) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]) as f64 / 32768.0;
        sum += sample * sample;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    (sum / count as f64).sqrt() as f32
}

/// Validated audio collected between `audio_start` and `audio_end`.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub format: FrameFormat,
    pub pcm: Bytes,
}

impl Utterance {
    pub fn samples(&self) -> usize {
        self.pcm.len() / self.format.block_align()
    }

    pub fn duration_ms(&self) -> u64 {
        self.samples() as u64 * 1000 / self.format.sample_rate as u64
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }
}
