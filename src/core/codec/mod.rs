//! Audio frame codec.
//!
//! Converts between the telephony wire format (base64 μ-law, 8 kHz, mono) and
//! the model stream format (PCM16 little-endian, 16 kHz in / 24 kHz out).
//!
//! The codec is deterministic and stateless. Sequence numbering and any
//! chunking belong to the caller, so a single [`AudioFrameCodec`] is shared by
//! every session.

pub mod g711;
pub mod resample;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use base64::prelude::*;
use bytes::Bytes;
use thiserror::Error;

/// Telephony media sample rate (μ-law).
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;

/// Sample rate the model accepts for input audio.
pub const MODEL_INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of audio produced by the model.
pub const MODEL_OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Errors raised on malformed or unsupported audio payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The payload carried no audio
    #[error("Empty audio payload")]
    Empty,

    /// The payload was not valid base64
    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),

    /// PCM16 payload with a dangling byte
    #[error("Truncated PCM16 payload: {0} bytes")]
    OddLength(usize),

    /// Rate conversion that the codec cannot perform
    #[error("Unsupported sample rate conversion: {from} Hz -> {to} Hz")]
    UnsupportedRate { from: u32, to: u32 },
}

/// Which party produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioSource {
    Caller,
    Assistant,
}

impl fmt::Display for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioSource::Caller => write!(f, "caller"),
            AudioSource::Assistant => write!(f, "assistant"),
        }
    }
}

/// An immutable chunk of mono PCM16 audio.
///
/// Samples are reference counted so a frame can move between queues without
/// copying; nothing can mutate them after construction.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    sequence: u64,
    source: AudioSource,
    sample_rate: u32,
    samples: Arc<[i16]>,
    created_at: Instant,
}

impl AudioFrame {
    pub fn new(source: AudioSource, sequence: u64, sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            sequence,
            source,
            sample_rate,
            samples: samples.into(),
            created_at: Instant::now(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn source(&self) -> AudioSource {
        self.source
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Duration of the frame in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    /// Root-mean-square energy normalized to `0.0..=1.0`.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }

        let sum_squares: f64 = self
            .samples
            .iter()
            .map(|&sample| {
                let normalized = sample as f64 / i16::MAX as f64;
                normalized * normalized
            })
            .sum();

        (sum_squares / self.samples.len() as f64).sqrt() as f32
    }

    /// Whether the frame's energy is at or below `threshold`.
    pub fn is_silent(&self, threshold: f32) -> bool {
        self.rms() <= threshold
    }
}

/// Stateless converter between telephony and model audio formats.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrameCodec {
    telephony_rate: u32,
    model_input_rate: u32,
}

impl Default for AudioFrameCodec {
    fn default() -> Self {
        Self {
            telephony_rate: TELEPHONY_SAMPLE_RATE,
            model_input_rate: MODEL_INPUT_SAMPLE_RATE,
        }
    }
}

impl AudioFrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a telephony media payload (base64 μ-law) into a caller frame.
    pub fn decode_inbound(&self, payload: &str, sequence: u64) -> Result<AudioFrame, FormatError> {
        if payload.is_empty() {
            return Err(FormatError::Empty);
        }

        let ulaw = BASE64_STANDARD
            .decode(payload)
            .map_err(|e| FormatError::InvalidBase64(e.to_string()))?;

        if ulaw.is_empty() {
            return Err(FormatError::Empty);
        }

        Ok(AudioFrame::new(
            AudioSource::Caller,
            sequence,
            self.telephony_rate,
            g711::decode(&ulaw),
        ))
    }

    /// Encode a frame as a telephony media payload (base64 μ-law, 8 kHz).
    pub fn encode_outbound(&self, frame: &AudioFrame) -> Result<String, FormatError> {
        let samples = resample::resample(frame.samples(), frame.sample_rate(), self.telephony_rate)?;
        Ok(BASE64_STANDARD.encode(g711::encode(&samples)))
    }

    /// Convert a caller frame to PCM16 LE bytes at the model input rate.
    pub fn to_model_input(&self, frame: &AudioFrame) -> Result<Bytes, FormatError> {
        let samples =
            resample::resample(frame.samples(), frame.sample_rate(), self.model_input_rate)?;
        Ok(pcm16_to_bytes(&samples))
    }

    /// Build an assistant frame from raw PCM16 LE bytes produced by the model.
    pub fn decode_model_audio(
        &self,
        data: &[u8],
        sample_rate: u32,
        sequence: u64,
    ) -> Result<AudioFrame, FormatError> {
        if data.is_empty() {
            return Err(FormatError::Empty);
        }
        if data.len() % 2 != 0 {
            return Err(FormatError::OddLength(data.len()));
        }
        if sample_rate == 0 || sample_rate % self.telephony_rate != 0 {
            return Err(FormatError::UnsupportedRate {
                from: sample_rate,
                to: self.telephony_rate,
            });
        }

        Ok(AudioFrame::new(
            AudioSource::Assistant,
            sequence,
            sample_rate,
            bytes_to_pcm16(data),
        ))
    }

    pub fn model_input_rate(&self) -> u32 {
        self.model_input_rate
    }
}

fn pcm16_to_bytes(samples: &[i16]) -> Bytes {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    Bytes::from(out)
}

fn bytes_to_pcm16(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Parse the sample rate out of a mime type such as `audio/pcm;rate=24000`.
pub fn rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|part| part.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}
