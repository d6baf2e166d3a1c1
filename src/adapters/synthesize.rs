//! # Synthesis Adapter
//!
//! Text-to-speech over an OpenAI-compatible `/audio/speech` endpoint,
//! returning linear PCM at the engine's native rate. The codec bridge
//! downsamples and compands afterwards; this adapter only gets audio into
//! `PcmAudio` form.
//!
//! ## Contract:
//! One attempt per turn. Transport/auth failures and undecodable audio
//! surface as `AdapterError::Synthesis`; the session answers that with
//! silence (no outbound media for the turn) rather than retrying.

use crate::audio::PcmAudio;
use crate::error::AdapterError;
use async_trait::async_trait;
use serde_json::json;
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, warn};

/// Backend for synthesizing agent speech.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Synthesize `text` to linear PCM at the backend's native rate.
    async fn synthesize(&self, text: &str) -> Result<PcmAudio, AdapterError>;

    /// Short backend name for logs and health reporting.
    fn name(&self) -> &'static str;
}

/// Production backend: OpenAI-compatible speech API, WAV response format.
pub struct HttpSynthesizer {
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    client: reqwest::Client,
}

impl HttpSynthesizer {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
            client,
        })
    }

    /// Parse a WAV response body into PCM samples.
    fn parse_wav(bytes: &[u8]) -> Result<PcmAudio, AdapterError> {
        let mut cursor = Cursor::new(bytes);
        let (header, data) = wav::read(&mut cursor)
            .map_err(|e| AdapterError::Synthesis(format!("WAV parse failed: {}", e)))?;

        if header.channel_count != 1 {
            return Err(AdapterError::Synthesis(format!(
                "expected mono synthesis audio, got {} channels",
                header.channel_count
            )));
        }

        match data {
            wav::BitDepth::Sixteen(samples) => {
                Ok(PcmAudio::new(samples, header.sampling_rate))
            }
            _ => Err(AdapterError::Synthesis(format!(
                "expected 16-bit synthesis audio, got {} bits",
                header.bits_per_sample
            ))),
        }
    }
}

#[async_trait]
impl SynthesisBackend for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<PcmAudio, AdapterError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(PcmAudio::new(Vec::new(), 8000));
        }

        let url = format!("{}/audio/speech", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
            "response_format": "wav",
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::Synthesis(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("synthesis API error {}: {}", status, body);
            return Err(AdapterError::Synthesis(format!(
                "synthesis API returned {}",
                status
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AdapterError::Synthesis(e.to_string()))?;
        let audio = Self::parse_wav(&bytes)?;

        debug!(
            "synthesized {} chars -> {:.2}s of audio at {} Hz",
            text.len(),
            audio.duration_seconds(),
            audio.sample_rate
        );
        Ok(audio)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Backend used when no synthesis service is configured: produces a short
/// deterministic tone sized to the text, so the full pipeline (including
/// playback) stays exercisable in development.
#[derive(Debug)]
pub struct ToneSynthesizer {
    sample_rate: u32,
}

impl ToneSynthesizer {
    pub fn new() -> Self {
        Self { sample_rate: 16000 }
    }
}

impl Default for ToneSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SynthesisBackend for ToneSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<PcmAudio, AdapterError> {
        let words = text.split_whitespace().count();
        // ~80ms per word, bounded so a long reply can't ring forever
        let duration_secs = (words as f64 * 0.08).clamp(0.2, 2.0);
        let total = (duration_secs * self.sample_rate as f64) as usize;

        let samples: Vec<i16> = (0..total)
            .map(|i| {
                let t = i as f64 / self.sample_rate as f64;
                (8000.0 * (2.0 * std::f64::consts::PI * 440.0 * t).sin()) as i16
            })
            .collect();

        Ok(PcmAudio::new(samples, self.sample_rate))
    }

    fn name(&self) -> &'static str {
        "tone"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::transcribe::pcm_to_wav;

    #[tokio::test]
    async fn test_tone_synthesizer_scales_with_text() {
        let backend = ToneSynthesizer::new();
        let short = backend.synthesize("hi there friend").await.unwrap();
        let long = backend
            .synthesize("this reply has quite a few more words in it than the short one")
            .await
            .unwrap();

        assert_eq!(short.sample_rate, 16000);
        assert!(!short.is_empty());
        assert!(long.samples.len() > short.samples.len());
        // Bounded above at 2 seconds
        assert!(long.duration_seconds() <= 2.0 + 1e-9);
    }

    #[test]
    fn test_parse_wav_round_trip() {
        let samples = vec![0i16, 2000, -2000, 500];
        let wav_bytes = pcm_to_wav(&samples, 16000);
        let audio = HttpSynthesizer::parse_wav(&wav_bytes).unwrap();
        assert_eq!(audio.sample_rate, 16000);
        assert_eq!(audio.samples, samples);
    }

    #[test]
    fn test_parse_wav_rejects_garbage() {
        assert!(HttpSynthesizer::parse_wav(&[0u8; 10]).is_err());
    }
}
