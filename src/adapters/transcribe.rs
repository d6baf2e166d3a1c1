//! # Transcription Adapter
//!
//! Speech-to-text over an OpenAI-compatible `/audio/transcriptions`
//! endpoint, behind a backend trait so the call pipeline never depends on a
//! concrete engine.
//!
//! ## Contract:
//! Input is a pipeline [`AudioFrame`] in whatever format the line delivered
//! (normally 8 kHz μ-law); the backend owns any decoding the engine needs,
//! so callers never pay for a decode the engine could have skipped. Output
//! is the transcript text, or `AdapterError::NoTranscript` when no engine
//! is configured or nothing confident was heard. Any transport failure is
//! reported as `NoTranscript` too; the session treats all of them as a
//! silent turn.

use crate::audio::{codec, pcm_to_le_bytes, AudioFrame};
use crate::error::AdapterError;
use async_trait::async_trait;
use byteorder::{LittleEndian, WriteBytesExt};
use std::time::Duration;
use tracing::{debug, warn};

/// Backend for converting caller audio into text.
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Transcribe one audio frame. Empty text means nothing was heard.
    async fn transcribe(&self, frame: &AudioFrame) -> Result<String, AdapterError>;

    /// Short backend name for logs and health reporting.
    fn name(&self) -> &'static str;
}

/// Build a 16-bit mono WAV byte buffer for API upload.
pub(crate) fn pcm_to_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data = pcm_to_le_bytes(samples);
    let mut buf = Vec::with_capacity(44 + data.len());

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.write_u32::<LittleEndian>(36 + data.len() as u32).unwrap();
    buf.extend_from_slice(b"WAVE");
    // fmt subchunk: PCM, mono, 16-bit
    buf.extend_from_slice(b"fmt ");
    buf.write_u32::<LittleEndian>(16).unwrap();
    buf.write_u16::<LittleEndian>(1).unwrap();
    buf.write_u16::<LittleEndian>(1).unwrap();
    buf.write_u32::<LittleEndian>(sample_rate).unwrap();
    buf.write_u32::<LittleEndian>(sample_rate * 2).unwrap();
    buf.write_u16::<LittleEndian>(2).unwrap();
    buf.write_u16::<LittleEndian>(16).unwrap();
    // data subchunk
    buf.extend_from_slice(b"data");
    buf.write_u32::<LittleEndian>(data.len() as u32).unwrap();
    buf.extend_from_slice(&data);

    buf
}

/// Production backend: OpenAI-compatible transcription API (Whisper-style).
///
/// Posts the frame as a mono WAV via multipart to
/// `{base_url}/audio/transcriptions` and reads the `text` field of the JSON
/// response.
pub struct HttpTranscriber {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl HttpTranscriber {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }
}

#[async_trait]
impl TranscriptionBackend for HttpTranscriber {
    async fn transcribe(&self, frame: &AudioFrame) -> Result<String, AdapterError> {
        if frame.data.is_empty() {
            return Ok(String::new());
        }

        // The upload format is linear WAV; expand μ-law here rather than
        // force every engine through the codec bridge.
        let pcm = codec::decode_frame(frame).map_err(|e| {
            warn!("transcription input could not be decoded: {}", e);
            AdapterError::NoTranscript
        })?;
        let wav = pcm_to_wav(&pcm.samples, pcm.sample_rate);

        let url = format!(
            "{}/audio/transcriptions",
            self.base_url.trim_end_matches('/')
        );
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| {
                warn!("transcription upload could not be built: {}", e);
                AdapterError::NoTranscript
            })?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                warn!("transcription request failed: {}", e);
                AdapterError::NoTranscript
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("transcription API error {}: {}", status, body);
            return Err(AdapterError::NoTranscript);
        }

        let json: serde_json::Value = response.json().await.map_err(|e| {
            warn!("transcription response was not JSON: {}", e);
            AdapterError::NoTranscript
        })?;

        let text = json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string();

        debug!("transcribed {} bytes -> {} chars", frame.data.len(), text.len());
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Backend used when no transcription engine is configured: every frame
/// fails with `NoTranscript`, so calls stay connected but silent.
#[derive(Debug, Default)]
pub struct DisabledTranscriber;

#[async_trait]
impl TranscriptionBackend for DisabledTranscriber {
    async fn transcribe(&self, _frame: &AudioFrame) -> Result<String, AdapterError> {
        Err(AdapterError::NoTranscript)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_layout() {
        let wav = pcm_to_wav(&[0i16, 1000, -1000], 8000);
        assert_eq!(wav.len(), 44 + 6);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[36..40], b"data");
        // Sample rate field at offset 24
        assert_eq!(u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]), 8000);
        // Data length field at offset 40
        assert_eq!(u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]), 6);
    }

    #[tokio::test]
    async fn test_disabled_backend_yields_no_transcript() {
        let backend = DisabledTranscriber;
        let frame = AudioFrame::mulaw(vec![0xFF; 160]);
        assert!(matches!(
            backend.transcribe(&frame).await,
            Err(AdapterError::NoTranscript)
        ));
    }
}
