//! # Call Session and Turn-Taking State Machine
//!
//! One `CallSession` per active call. The session owns the conversation
//! history and a small state machine that serializes the reply pipeline:
//! at most one utterance of a call is ever in flight, so two turns can
//! never interleave on the wire.
//!
//! ## Session Lifecycle:
//! 1. **Idle**: waiting for caller audio
//! 2. **Processing**: transcription / reply / synthesis in flight
//! 3. **Closed**: stream closed or registry teardown (terminal, reachable
//!    from any state)
//!
//! ## Turn pipeline (one accepted frame):
//! transcribe → (if non-empty) record caller turn → generate reply (with
//! deterministic fallback) → record agent turn → synthesize → downsample +
//! compand → emit `clear` followed by one `media` event. The `clear` tells
//! the platform to throw away any audio still queued for playback, so a
//! fresh agent line always wins over a stale one (barge-in).
//!
//! ## Failure containment:
//! Service failures never leave the session: no transcript means a silent
//! turn, a reply failure is answered with an echo fallback, a synthesis or
//! encode failure skips playback. A timed-out service call counts as that
//! service failing.

use crate::adapters::{ReplyBackend, ServiceAdapters, SynthesisBackend, TranscriptionBackend};
use crate::audio::{codec, AudioFrame};
use crate::config::AudioConfig;
use crate::conversation::{ConversationHistory, Role};
use crate::error::AdapterError;
use crate::websocket::StreamEvent;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Current state of a call's turn-taking machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Waiting for caller audio
    Idle,
    /// A turn is being processed
    Processing,
    /// Stream closed; no further processing or output
    Closed,
}

impl CallState {
    /// Convert state to string for API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Processing => "processing",
            CallState::Closed => "closed",
        }
    }
}

/// What to do with caller audio that arrives while a turn is in flight.
///
/// `Drop` is the reference behavior: it caps latency growth at the cost of
/// losing caller audio during agent processing. `Queue` defers frames to
/// the next idle cycle, bounded so a chatty caller can't grow the backlog
/// without limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyPolicy {
    Drop,
    Queue { max_frames: usize },
}

impl BusyPolicy {
    /// Read the policy out of the audio configuration section.
    pub fn from_config(config: &AudioConfig) -> Self {
        if config.busy_policy == "queue" {
            BusyPolicy::Queue {
                max_frames: config.max_queued_frames,
            }
        } else {
            BusyPolicy::Drop
        }
    }
}

/// Outcome of submitting one inbound frame to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// The frame starts a new processing cycle; the caller must drain turns
    Accepted,
    /// A cycle is already running; the frame waits in the queue
    Queued,
    /// Discarded (busy with Drop policy, queue full, or session closed)
    Dropped,
}

/// State shared between frame submission and the drain loop. One lock
/// covers both fields so a frame can never slip between "queue is empty"
/// and "machine went idle".
#[derive(Debug)]
struct TurnMachine {
    state: CallState,
    pending: VecDeque<AudioFrame>,
}

/// A single live call: identifier, dialogue history, turn machine, and the
/// service adapters the pipeline runs against.
///
/// ## Ownership:
/// The session's state is only ever mutated through its own methods, driven
/// by the one socket connection that created it. Across calls, sessions
/// share nothing but the registry entry.
pub struct CallSession {
    /// Opaque identifier of the phone call (from the stream URI)
    call_id: String,

    /// External service backends plus the per-call timeout
    adapters: ServiceAdapters,

    /// Ordered dialogue history, discarded with the session
    history: ConversationHistory,

    /// Turn-taking state plus the pending-frame queue
    machine: Mutex<TurnMachine>,

    /// Busy-frame policy for this call
    busy_policy: BusyPolicy,

    /// When the session was created
    created_at: DateTime<Utc>,

    /// Completed reply cycles (caller turn recorded)
    turns_completed: AtomicU64,

    /// Frames discarded by the busy policy or after closure
    frames_dropped: AtomicU64,
}

impl CallSession {
    pub fn new(call_id: impl Into<String>, adapters: ServiceAdapters, busy_policy: BusyPolicy) -> Self {
        Self {
            call_id: call_id.into(),
            adapters,
            history: ConversationHistory::new(),
            machine: Mutex::new(TurnMachine {
                state: CallState::Idle,
                pending: VecDeque::new(),
            }),
            busy_policy,
            created_at: Utc::now(),
            turns_completed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Current machine state.
    pub fn state(&self) -> CallState {
        self.machine.lock().unwrap().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CallState::Closed
    }

    /// Dialogue history snapshot (observability, reply context).
    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Submit one inbound caller frame to the turn machine.
    ///
    /// ## State Transition:
    /// - `Idle` → `Processing`, frame accepted; the caller must then drive
    ///   [`CallSession::next_turn`] until it returns `None`
    /// - `Processing` → frame queued or dropped per the busy policy
    /// - `Closed` → frame dropped
    pub fn submit_frame(&self, frame: AudioFrame) -> FrameDisposition {
        let mut machine = self.machine.lock().unwrap();
        match machine.state {
            CallState::Closed => {
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                FrameDisposition::Dropped
            }
            CallState::Processing => match self.busy_policy {
                BusyPolicy::Drop => {
                    self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("call {}: busy, dropping {} byte frame", self.call_id, frame.data.len());
                    FrameDisposition::Dropped
                }
                BusyPolicy::Queue { max_frames } => {
                    if machine.pending.len() >= max_frames {
                        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        debug!("call {}: frame queue full, dropping frame", self.call_id);
                        FrameDisposition::Dropped
                    } else {
                        machine.pending.push_back(frame);
                        FrameDisposition::Queued
                    }
                }
            },
            CallState::Idle => {
                machine.state = CallState::Processing;
                machine.pending.push_back(frame);
                FrameDisposition::Accepted
            }
        }
    }

    /// Run the next queued turn to completion.
    ///
    /// ## Returns:
    /// - **Some(events)**: one turn ran; the events (possibly none, for a
    ///   silent turn) are ready to send if the session is still live
    /// - **None**: no work left: the machine has returned to `Idle` (or
    ///   the session closed) and the drain loop should end
    ///
    /// Exactly one drain loop runs at a time: frames only enter the queue
    /// through `submit_frame`, which starts a loop only on the
    /// `Idle → Processing` edge.
    pub async fn next_turn(&self) -> Option<Vec<StreamEvent>> {
        let frame = {
            let mut machine = self.machine.lock().unwrap();
            match machine.state {
                CallState::Closed => return None,
                _ => match machine.pending.pop_front() {
                    Some(frame) => frame,
                    None => {
                        if machine.state == CallState::Processing {
                            machine.state = CallState::Idle;
                        }
                        return None;
                    }
                },
            }
        };

        Some(self.run_turn(frame).await)
    }

    /// Close the session: terminal from any state. Pending frames are
    /// discarded and no outbound events may be produced afterwards.
    pub fn close(&self) {
        let mut machine = self.machine.lock().unwrap();
        if machine.state != CallState::Closed {
            info!(
                "call {}: session closed after {} turns ({} frames dropped)",
                self.call_id,
                self.turns_completed.load(Ordering::Relaxed),
                self.frames_dropped.load(Ordering::Relaxed)
            );
        }
        machine.state = CallState::Closed;
        machine.pending.clear();
    }

    /// Observability summary for the active-calls endpoint.
    pub fn summary(&self) -> CallSummary {
        CallSummary {
            call_id: self.call_id.clone(),
            state: self.state().as_str().to_string(),
            turns_completed: self.turns_completed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            history_turns: self.history.len(),
            created_at: self.created_at,
            duration_seconds: (Utc::now() - self.created_at).num_milliseconds() as f64 / 1000.0,
        }
    }

    /// Run the full reply pipeline for one caller frame.
    ///
    /// Every service failure is handled here; the return value is the
    /// outbound burst for the turn: `[clear, media]` when there is a reply
    /// to play, empty when the turn ends silently.
    async fn run_turn(&self, frame: AudioFrame) -> Vec<StreamEvent> {
        let timeout = self.adapters.request_timeout;

        // Transcription: anything short of confident text is a silent turn.
        let transcript = match tokio::time::timeout(
            timeout,
            self.adapters.transcription.transcribe(&frame),
        )
        .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(AdapterError::NoTranscript)) => {
                debug!("call {}: no transcript for frame", self.call_id);
                String::new()
            }
            Ok(Err(e)) => {
                warn!("call {}: transcription failed: {}", self.call_id, e);
                String::new()
            }
            Err(_) => {
                warn!("call {}: transcription timed out", self.call_id);
                String::new()
            }
        };

        let transcript = transcript.trim().to_string();
        if transcript.is_empty() {
            return Vec::new();
        }

        info!("call {}: caller said '{}'", self.call_id, transcript);

        // Reply context is the history before this utterance; then the
        // utterance itself becomes part of the record.
        let context = self.history.snapshot();
        self.history.append(Role::Caller, transcript.clone());

        let reply = match tokio::time::timeout(
            timeout,
            self.adapters.reply.generate(&context, &transcript),
        )
        .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(
                    "call {}: reply generation failed, using fallback: {}",
                    self.call_id, e
                );
                fallback_reply(&transcript)
            }
            Err(_) => {
                warn!(
                    "call {}: reply generation timed out, using fallback",
                    self.call_id
                );
                fallback_reply(&transcript)
            }
        };

        self.history.append(Role::Agent, reply.clone());
        self.turns_completed.fetch_add(1, Ordering::Relaxed);
        info!("call {}: agent replies '{}'", self.call_id, reply);

        // Synthesis: one attempt; failure means silence for this turn.
        let audio = match tokio::time::timeout(timeout, self.adapters.synthesis.synthesize(&reply))
            .await
        {
            Ok(Ok(audio)) => audio,
            Ok(Err(e)) => {
                warn!(
                    "call {}: synthesis failed, skipping playback: {}",
                    self.call_id, e
                );
                return Vec::new();
            }
            Err(_) => {
                warn!(
                    "call {}: synthesis timed out, skipping playback",
                    self.call_id
                );
                return Vec::new();
            }
        };

        if audio.is_empty() {
            return Vec::new();
        }

        let payload = match codec::encode_to_telephony(&audio) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    "call {}: could not encode reply audio ({} Hz): {}",
                    self.call_id, audio.sample_rate, e
                );
                return Vec::new();
            }
        };

        if payload.is_empty() {
            return Vec::new();
        }

        debug!(
            "call {}: sending {} bytes of reply audio",
            self.call_id,
            payload.len()
        );

        // Flush whatever is still queued remotely, then play the reply.
        vec![StreamEvent::Clear, StreamEvent::media_from_audio(&payload)]
    }
}

/// Deterministic reply used when the reply service fails or times out.
fn fallback_reply(utterance: &str) -> String {
    format!("You said: {}", utterance)
}

/// Snapshot of one live call for observability.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CallSummary {
    pub call_id: String,
    pub state: String,
    pub turns_completed: u64,
    pub frames_dropped: u64,
    pub history_turns: usize,
    pub created_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ReplyBackend, ServiceAdapters, SynthesisBackend, TranscriptionBackend};
    use crate::audio::PcmAudio;
    use crate::conversation::Turn;
    use crate::websocket::StreamEvent;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use std::sync::Arc;
    use std::time::Duration;

    /// Maps silence frames (all 0xFF) to an empty transcript and anything
    /// else to a fixed utterance.
    struct StubTranscriber {
        text: String,
    }

    #[async_trait]
    impl TranscriptionBackend for StubTranscriber {
        async fn transcribe(&self, frame: &AudioFrame) -> Result<String, AdapterError> {
            if frame.data.iter().all(|&b| b == 0xFF) {
                Ok(String::new())
            } else {
                Ok(self.text.clone())
            }
        }

        fn name(&self) -> &'static str {
            "stub"
        }
    }

    struct StubReply {
        reply: String,
    }

    #[async_trait]
    impl ReplyBackend for StubReply {
        async fn generate(&self, _: &[Turn], _: &str) -> Result<String, AdapterError> {
            Ok(self.reply.clone())
        }

        fn name(&self) -> &'static str {
            "stub"
        }
    }

    struct FailingReply;

    #[async_trait]
    impl ReplyBackend for FailingReply {
        async fn generate(&self, _: &[Turn], _: &str) -> Result<String, AdapterError> {
            Err(AdapterError::ReplyGeneration("503 from upstream".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    struct HangingReply;

    #[async_trait]
    impl ReplyBackend for HangingReply {
        async fn generate(&self, _: &[Turn], _: &str) -> Result<String, AdapterError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("too late".to_string())
        }

        fn name(&self) -> &'static str {
            "hanging"
        }
    }

    /// Produces a constant-amplitude 16 kHz buffer so the companded output
    /// is predictable.
    struct StubSynthesizer {
        sample: i16,
        len: usize,
    }

    #[async_trait]
    impl SynthesisBackend for StubSynthesizer {
        async fn synthesize(&self, _: &str) -> Result<PcmAudio, AdapterError> {
            Ok(PcmAudio::new(vec![self.sample; self.len], 16000))
        }

        fn name(&self) -> &'static str {
            "stub"
        }
    }

    struct FailingSynthesizer;

    #[async_trait]
    impl SynthesisBackend for FailingSynthesizer {
        async fn synthesize(&self, _: &str) -> Result<PcmAudio, AdapterError> {
            Err(AdapterError::Synthesis("tts unreachable".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn stub_adapters(
        reply: Arc<dyn ReplyBackend>,
        synthesis: Arc<dyn SynthesisBackend>,
    ) -> ServiceAdapters {
        ServiceAdapters::from_backends(
            Arc::new(StubTranscriber {
                text: "book a ride".to_string(),
            }),
            reply,
            synthesis,
            Duration::from_secs(5),
        )
    }

    fn talking_session(call_id: &str, policy: BusyPolicy) -> CallSession {
        CallSession::new(
            call_id,
            stub_adapters(
                Arc::new(StubReply {
                    reply: "Sure, let's get that scheduled.".to_string(),
                }),
                Arc::new(StubSynthesizer {
                    sample: 1000,
                    len: 320,
                }),
            ),
            policy,
        )
    }

    fn speech_frame() -> AudioFrame {
        AudioFrame::mulaw(vec![0x00; 160])
    }

    fn silence_frame() -> AudioFrame {
        AudioFrame::mulaw(vec![0xFF; 160])
    }

    fn media_payload(event: &StreamEvent) -> Vec<u8> {
        match event {
            StreamEvent::Media { media } => BASE64.decode(&media.payload).unwrap(),
            other => panic!("expected media event, got {:?}", other),
        }
    }

    /// Silence in, nothing out: no reply cycle runs and the machine goes
    /// straight back to idle.
    #[tokio::test]
    async fn test_silent_turn_emits_nothing() {
        let session = talking_session("CA123", BusyPolicy::Drop);

        assert_eq!(session.submit_frame(silence_frame()), FrameDisposition::Accepted);
        let events = session.next_turn().await.unwrap();
        assert!(events.is_empty());
        assert!(session.next_turn().await.is_none());

        assert_eq!(session.state(), CallState::Idle);
        assert!(session.history.is_empty());
    }

    /// Full reply cycle: clear-then-media burst, both dialogue turns
    /// recorded, payload is the companded synthesis audio.
    #[tokio::test]
    async fn test_reply_cycle_end_to_end() {
        let session = talking_session("CA124", BusyPolicy::Drop);

        assert_eq!(session.submit_frame(speech_frame()), FrameDisposition::Accepted);
        let events = session.next_turn().await.unwrap();
        assert!(session.next_turn().await.is_none());

        // Barge-in ordering: exactly one clear, immediately before the media
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::Clear);

        // 320 samples at 16kHz average down to 160 line bytes
        let payload = media_payload(&events[1]);
        assert_eq!(payload.len(), 160);

        // Constant 1000-sample input must come back near 1000 after the
        // companding round trip
        for byte in payload {
            let decoded = crate::audio::codec::mulaw_decode_sample(byte);
            assert!((decoded - 1000).abs() <= 40, "sample decoded to {}", decoded);
        }

        let turns = session.history.snapshot();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "book a ride");
        assert_eq!(turns[1].text, "Sure, let's get that scheduled.");
        assert_eq!(session.state(), CallState::Idle);
    }

    /// Drop policy: a frame arriving mid-processing is discarded, so at
    /// most one reply cycle runs.
    #[tokio::test]
    async fn test_busy_frame_dropped() {
        let session = talking_session("CA125", BusyPolicy::Drop);

        assert_eq!(session.submit_frame(speech_frame()), FrameDisposition::Accepted);
        // The machine is Processing until the drain loop finishes
        assert_eq!(session.submit_frame(speech_frame()), FrameDisposition::Dropped);
        assert_eq!(session.submit_frame(speech_frame()), FrameDisposition::Dropped);

        let mut turns = 0;
        while let Some(_events) = session.next_turn().await {
            turns += 1;
        }
        assert_eq!(turns, 1);
        assert_eq!(session.summary().frames_dropped, 2);
        assert_eq!(session.state(), CallState::Idle);
    }

    /// Queue policy: busy frames wait and are processed in order by the
    /// same drain loop, still one at a time.
    #[tokio::test]
    async fn test_busy_frame_queued() {
        let session = talking_session("CA126", BusyPolicy::Queue { max_frames: 2 });

        assert_eq!(session.submit_frame(speech_frame()), FrameDisposition::Accepted);
        assert_eq!(session.submit_frame(speech_frame()), FrameDisposition::Queued);
        assert_eq!(session.submit_frame(speech_frame()), FrameDisposition::Queued);
        // Queue bound reached
        assert_eq!(session.submit_frame(speech_frame()), FrameDisposition::Dropped);

        let mut turns = 0;
        while let Some(_events) = session.next_turn().await {
            turns += 1;
        }
        assert_eq!(turns, 3);
        assert_eq!(session.state(), CallState::Idle);
        // Three reply cycles -> six dialogue turns
        assert_eq!(session.history.len(), 6);
    }

    /// A failing reply service produces the echo fallback instead of
    /// killing the turn.
    #[tokio::test]
    async fn test_reply_failure_uses_fallback() {
        let session = CallSession::new(
            "CA127",
            stub_adapters(
                Arc::new(FailingReply),
                Arc::new(StubSynthesizer {
                    sample: 1000,
                    len: 320,
                }),
            ),
            BusyPolicy::Drop,
        );

        session.submit_frame(speech_frame());
        let events = session.next_turn().await.unwrap();

        // Playback still happens, with the fallback line
        assert_eq!(events.len(), 2);
        let turns = session.history.snapshot();
        assert_eq!(turns[1].text, "You said: book a ride");
        assert_eq!(session.state(), CallState::Processing);
        assert!(session.next_turn().await.is_none());
        assert_eq!(session.state(), CallState::Idle);
    }

    /// A reply service that never answers is cut off by the bounded
    /// timeout and treated as a failure.
    #[tokio::test]
    async fn test_reply_timeout_uses_fallback() {
        // A tight bound keeps the test fast; the hanging backend sleeps
        // far past it either way
        let adapters = ServiceAdapters::from_backends(
            Arc::new(StubTranscriber {
                text: "book a ride".to_string(),
            }),
            Arc::new(HangingReply),
            Arc::new(StubSynthesizer {
                sample: 1000,
                len: 320,
            }),
            Duration::from_millis(50),
        );
        let session = CallSession::new("CA128", adapters, BusyPolicy::Drop);

        session.submit_frame(speech_frame());
        let events = session.next_turn().await.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(session.history.snapshot()[1].text, "You said: book a ride");
    }

    /// Synthesis failure means silence: the dialogue advances but nothing
    /// is emitted, so no stray `clear` goes out either.
    #[tokio::test]
    async fn test_synthesis_failure_skips_playback() {
        let session = CallSession::new(
            "CA129",
            stub_adapters(
                Arc::new(StubReply {
                    reply: "Sure.".to_string(),
                }),
                Arc::new(FailingSynthesizer),
            ),
            BusyPolicy::Drop,
        );

        session.submit_frame(speech_frame());
        let events = session.next_turn().await.unwrap();
        assert!(events.is_empty());

        // Both turns were still recorded
        assert_eq!(session.history.len(), 2);
        assert!(session.next_turn().await.is_none());
        assert_eq!(session.state(), CallState::Idle);
    }

    /// Closed is terminal: frames are refused and the drain loop stops.
    #[tokio::test]
    async fn test_closed_session_refuses_work() {
        let session = talking_session("CA130", BusyPolicy::Drop);

        session.close();
        assert!(session.is_closed());
        assert_eq!(session.submit_frame(speech_frame()), FrameDisposition::Dropped);
        assert!(session.next_turn().await.is_none());

        // Closing again is harmless
        session.close();
        assert_eq!(session.state(), CallState::Closed);
    }

    /// Closing mid-drain discards queued frames.
    #[tokio::test]
    async fn test_close_discards_pending_frames() {
        let session = talking_session("CA131", BusyPolicy::Queue { max_frames: 4 });

        session.submit_frame(speech_frame());
        session.submit_frame(speech_frame());
        session.close();

        assert!(session.next_turn().await.is_none());
        assert!(session.history.is_empty());
    }

    #[tokio::test]
    async fn test_summary_reflects_activity() {
        let session = talking_session("CA132", BusyPolicy::Drop);
        session.submit_frame(speech_frame());
        while session.next_turn().await.is_some() {}

        let summary = session.summary();
        assert_eq!(summary.call_id, "CA132");
        assert_eq!(summary.state, "idle");
        assert_eq!(summary.turns_completed, 1);
        assert_eq!(summary.history_turns, 2);
    }
}
