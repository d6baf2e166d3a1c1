//! # Audio Processing Module
//!
//! Audio types and the codec bridge between the telephony line format and
//! linear PCM.
//!
//! ## Key Components:
//! - **Codec**: G.711 μ-law companding (8-bit log samples ⇄ 16-bit PCM)
//! - **Resampler**: averaging downsampler to the 8 kHz line rate
//! - **Frame types**: tagged audio buffers passed between pipeline steps
//!
//! ## Audio Format Requirements:
//! - **Telephony line**: 8 kHz, 8-bit μ-law, mono
//! - **Linear PCM**: 16-bit signed, little-endian when serialized
//! - **Synthesis output**: 16-bit PCM at the synthesizer's native rate
//!   (commonly 16 or 24 kHz), downsampled before companding

pub mod codec;
pub mod resample;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Format tag for an [`AudioFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// 8-bit μ-law companded samples at 8 kHz (the telephony line format)
    Mulaw8k,

    /// 16-bit signed little-endian PCM at the stated sample rate
    Pcm16 { sample_rate: u32 },
}

impl FrameFormat {
    /// Sample rate of the audio in this format.
    pub fn sample_rate(&self) -> u32 {
        match self {
            FrameFormat::Mulaw8k => 8000,
            FrameFormat::Pcm16 { sample_rate } => *sample_rate,
        }
    }
}

/// One chunk of audio moving through the pipeline: raw bytes plus the
/// format they are in. Frames are transient; nothing stores them past the
/// pipeline step that consumes them.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub data: Vec<u8>,
    pub format: FrameFormat,
}

impl AudioFrame {
    /// Wrap a μ-law payload as received from the telephony stream.
    pub fn mulaw(data: Vec<u8>) -> Self {
        Self {
            data,
            format: FrameFormat::Mulaw8k,
        }
    }

    /// Number of audio samples in the frame.
    pub fn sample_count(&self) -> usize {
        match self.format {
            FrameFormat::Mulaw8k => self.data.len(),
            FrameFormat::Pcm16 { .. } => self.data.len() / 2,
        }
    }

    /// Duration of the frame in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.sample_count() as f64 / self.format.sample_rate() as f64
    }
}

/// Decoded linear audio: 16-bit samples plus their sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl PcmAudio {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Serialize PCM samples as little-endian bytes (wire/WAV order).
pub fn pcm_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // Writing to a Vec cannot fail
        bytes.write_i16::<LittleEndian>(sample).unwrap();
    }
    bytes
}

/// Parse little-endian bytes into PCM samples.
///
/// ## Error Handling:
/// Returns an error on an odd byte count; 16-bit samples are two bytes each.
pub fn le_bytes_to_pcm(data: &[u8]) -> anyhow::Result<Vec<i16>> {
    if data.len() % 2 != 0 {
        return Err(anyhow::anyhow!(
            "PCM data length must be even for 16-bit samples, got {} bytes",
            data.len()
        ));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_byte_round_trip() {
        let samples = vec![0i16, 1, -1, 16384, -16384, i16::MAX, i16::MIN];
        let bytes = pcm_to_le_bytes(&samples);
        assert_eq!(bytes.len(), samples.len() * 2);
        assert_eq!(le_bytes_to_pcm(&bytes).unwrap(), samples);
    }

    #[test]
    fn test_odd_byte_count_rejected() {
        assert!(le_bytes_to_pcm(&[0u8, 1, 2]).is_err());
    }

    #[test]
    fn test_frame_duration() {
        // 160 μ-law bytes = 160 samples = 20ms at 8kHz
        let frame = AudioFrame::mulaw(vec![0xFF; 160]);
        assert_eq!(frame.sample_count(), 160);
        assert!((frame.duration_seconds() - 0.02).abs() < 1e-9);
    }
}
