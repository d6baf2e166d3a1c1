//! # External Service Adapters
//!
//! Narrow contracts for the three external services the bridge depends on:
//! speech-to-text, reply generation, and speech synthesis. Each adapter is
//! a trait with a production HTTP implementation and a local fallback, so
//! the pipeline is oblivious to which engine is behind it and the process
//! runs end-to-end with no credentials at all.
//!
//! ## Failure ownership:
//! Each adapter's documented failure (`AdapterError`) is handled inside the
//! call session: transcription failure ends the turn silently, reply
//! failure becomes a deterministic fallback line, synthesis failure skips
//! playback. Nothing here is allowed to take a call down.

pub mod reply;
pub mod synthesize;
pub mod transcribe;

pub use reply::{EchoReply, HttpReplyGenerator, ReplyBackend};
pub use synthesize::{HttpSynthesizer, SynthesisBackend, ToneSynthesizer};
pub use transcribe::{DisabledTranscriber, HttpTranscriber, TranscriptionBackend};

use crate::config::AppConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The three service backends a call session works against, plus the bound
/// applied to every individual service call.
#[derive(Clone)]
pub struct ServiceAdapters {
    pub transcription: Arc<dyn TranscriptionBackend>,
    pub reply: Arc<dyn ReplyBackend>,
    pub synthesis: Arc<dyn SynthesisBackend>,

    /// Per-call timeout; an elapsed timeout counts as that adapter's failure.
    pub request_timeout: Duration,
}

impl ServiceAdapters {
    /// Wire up backends from configuration: the HTTP implementation when an
    /// API key is present, the local fallback otherwise.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.services.request_timeout_secs);

        let transcription: Arc<dyn TranscriptionBackend> = match &config.services.stt_api_key {
            Some(key) => Arc::new(HttpTranscriber::new(
                config.services.stt_url.clone(),
                key.clone(),
                config.services.stt_model.clone(),
                timeout,
            )?),
            None => Arc::new(DisabledTranscriber),
        };

        let reply: Arc<dyn ReplyBackend> = match &config.services.llm_api_key {
            Some(key) => Arc::new(HttpReplyGenerator::new(
                config.services.llm_url.clone(),
                key.clone(),
                config.services.llm_model.clone(),
                config.services.system_prompt.clone(),
                timeout,
            )?),
            None => Arc::new(EchoReply),
        };

        let synthesis: Arc<dyn SynthesisBackend> = match &config.services.tts_api_key {
            Some(key) => Arc::new(HttpSynthesizer::new(
                config.services.tts_url.clone(),
                key.clone(),
                config.services.tts_model.clone(),
                config.services.tts_voice.clone(),
                timeout,
            )?),
            None => Arc::new(ToneSynthesizer::new()),
        };

        info!(
            "service adapters: transcription={}, reply={}, synthesis={} (timeout {}s)",
            transcription.name(),
            reply.name(),
            synthesis.name(),
            config.services.request_timeout_secs
        );

        Ok(Self {
            transcription,
            reply,
            synthesis,
            request_timeout: timeout,
        })
    }

    /// Build an adapter set directly from backends (tests, custom wiring).
    pub fn from_backends(
        transcription: Arc<dyn TranscriptionBackend>,
        reply: Arc<dyn ReplyBackend>,
        synthesis: Arc<dyn SynthesisBackend>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transcription,
            reply,
            synthesis,
            request_timeout,
        }
    }
}
