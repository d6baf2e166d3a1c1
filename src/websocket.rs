//! # Streaming Protocol Handler
//!
//! The WebSocket side of the bridge: one persistent connection per phone
//! call, carrying a JSON event envelope in both directions.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: the telephony platform connects to `/ws/call` with
//!    the call identifier as the `callId` query parameter
//! 2. **Inbound events**: `media` carries base64 μ-law caller audio;
//!    `closed`/`stop` end the call; `connect`/`start`/`mark` are
//!    informational
//! 3. **Outbound events**: exactly two shapes: `{"event":"clear"}` to
//!    flush the remote playback buffer, then
//!    `{"event":"media","media":{"payload":"<base64>"}}` with reply audio
//! 4. **Robustness**: malformed or unknown messages are logged and dropped;
//!    they never take the session down
//!
//! ## Actor Model:
//! Each connection is an Actix actor owning the socket. Pipeline work runs
//! in spawned tasks and posts results back through the actor mailbox, which
//! checks session liveness before anything is written; nothing goes out
//! after closure.

use crate::call::session::{BusyPolicy, CallSession, FrameDisposition};
use crate::error::AppError;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the actor pings the platform.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long without any inbound traffic before the connection is dead.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// The JSON event envelope exchanged over the stream socket.
///
/// Unknown fields inside a known event are ignored; unknown event names
/// fail to parse and are dropped by the handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Stream socket established (informational)
    Connect,

    /// Media stream metadata from the platform (informational)
    Start,

    /// One chunk of audio, base64-encoded μ-law
    Media { media: MediaPayload },

    /// Playback-position marker echo (informational)
    Mark,

    /// Instruct the remote end to discard queued playback audio (outbound;
    /// this is the barge-in mechanism)
    Clear,

    /// The remote end closed the stream
    Closed,

    /// The platform stopped the stream
    Stop,
}

/// Payload container of a `media` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded audio bytes
    pub payload: String,
}

impl StreamEvent {
    /// Build an outbound `media` event from raw μ-law bytes.
    pub fn media_from_audio(audio: &[u8]) -> Self {
        StreamEvent::Media {
            media: MediaPayload {
                payload: BASE64.encode(audio),
            },
        }
    }
}

impl MediaPayload {
    /// Decode the base64 payload back to audio bytes.
    pub fn decode_audio(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.payload)
    }
}

/// WebSocket actor for one call's stream connection.
pub struct CallWebSocket {
    /// Trace identifier for this socket connection
    connection_id: Uuid,

    /// The call session this connection feeds
    session: Arc<CallSession>,

    /// Shared application state (registry, metrics)
    app_state: web::Data<AppState>,

    /// Last time we heard anything from the platform
    last_heartbeat: Instant,
}

impl CallWebSocket {
    fn new(session: Arc<CallSession>, app_state: web::Data<AppState>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            session,
            app_state,
            last_heartbeat: Instant::now(),
        }
    }

    /// Handle one inbound `media` event: decode the payload and hand it to
    /// the session's turn machine. When the frame opens a new cycle, a
    /// drain task runs the pipeline and posts each turn's events back to
    /// the mailbox.
    fn handle_media(&self, media: MediaPayload, ctx: &mut ws::WebsocketContext<Self>) {
        let audio = match media.decode_audio() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    "call {}: dropping media event with invalid base64: {}",
                    self.session.call_id(),
                    e
                );
                return;
            }
        };

        if audio.is_empty() {
            return;
        }

        let frame = crate::audio::AudioFrame::mulaw(audio);
        match self.session.submit_frame(frame) {
            FrameDisposition::Accepted => {
                let session = self.session.clone();
                let addr = ctx.address();
                tokio::spawn(async move {
                    while let Some(events) = session.next_turn().await {
                        if events.is_empty() {
                            continue;
                        }
                        // Liveness gate: nothing is sent once the call closed
                        if session.is_closed() {
                            break;
                        }
                        addr.do_send(SendEvents(events));
                    }
                });
            }
            FrameDisposition::Queued => {
                debug!(
                    "call {}: frame queued behind in-flight turn",
                    self.session.call_id()
                );
            }
            FrameDisposition::Dropped => {
                // Already counted and logged by the session
            }
        }
    }
}

/// Message carrying one turn's outbound burst to the socket.
#[derive(Message)]
#[rtype(result = "()")]
struct SendEvents(Vec<StreamEvent>);

impl Actor for CallWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(
            "call {}: stream connected (connection {})",
            self.session.call_id(),
            self.connection_id
        );
        self.app_state.increment_active_calls();

        // Protocol-level heartbeat; the platform answers pings automatically
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(
                    "call {}: heartbeat timeout, closing stream",
                    act.session.call_id()
                );
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(
            "call {}: stream disconnected (connection {})",
            self.session.call_id(),
            self.connection_id
        );

        // Teardown: close the session and free the registry slot. The
        // drain task (if any) stops emitting the moment the session closes.
        self.app_state.registry.unregister(self.session.call_id());
        self.app_state.decrement_active_calls();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for CallWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match serde_json::from_str::<StreamEvent>(&text) {
                    Ok(StreamEvent::Media { media }) => {
                        self.handle_media(media, ctx);
                    }
                    Ok(StreamEvent::Closed) | Ok(StreamEvent::Stop) => {
                        info!(
                            "call {}: remote end ended the stream",
                            self.session.call_id()
                        );
                        ctx.stop();
                    }
                    Ok(StreamEvent::Connect) | Ok(StreamEvent::Start) | Ok(StreamEvent::Mark) => {
                        debug!(
                            "call {}: informational event: {}",
                            self.session.call_id(),
                            text.trim()
                        );
                    }
                    Ok(StreamEvent::Clear) => {
                        // Outbound-only shape; tolerated if echoed back
                        debug!("call {}: ignoring inbound clear", self.session.call_id());
                    }
                    Err(e) => {
                        // Malformed or unknown event: drop, never crash
                        warn!(
                            "call {}: dropping unparseable stream message: {}",
                            self.session.call_id(),
                            e
                        );
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                warn!(
                    "call {}: unexpected binary frame, ignoring",
                    self.session.call_id()
                );
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(
                    "call {}: stream closed: {:?}",
                    self.session.call_id(),
                    reason
                );
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("call {}: unexpected continuation frame", self.session.call_id());
            }
            Ok(ws::Message::Nop) => {}
            Err(e) => {
                error!(
                    "call {}: stream protocol error: {}",
                    self.session.call_id(),
                    e
                );
                ctx.stop();
            }
        }
    }
}

impl Handler<SendEvents> for CallWebSocket {
    type Result = ();

    fn handle(&mut self, msg: SendEvents, ctx: &mut Self::Context) {
        // Re-check liveness at the moment of writing
        if self.session.is_closed() {
            return;
        }

        for event in msg.0 {
            match serde_json::to_string(&event) {
                Ok(json) => ctx.text(json),
                Err(e) => {
                    error!(
                        "call {}: could not serialize outbound event: {}",
                        self.session.call_id(),
                        e
                    );
                }
            }
        }
    }
}

/// WebSocket endpoint handler: `GET /ws/call?callId=...`.
///
/// ## Connection admission:
/// The call identifier comes from the connection URI. A missing identifier
/// is a 400; an identifier that already has a live session, or a full
/// registry, is a 409: the connection is refused before any upgrade, and
/// no session is registered.
pub async fn call_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let query = web::Query::<std::collections::HashMap<String, String>>::from_query(
        req.query_string(),
    )
    .unwrap_or_else(|_| web::Query(std::collections::HashMap::new()));

    let call_id = match query.get("callId").map(|s| s.trim()).filter(|s| !s.is_empty()) {
        Some(id) => id.to_string(),
        None => {
            warn!("stream connection refused: missing callId parameter");
            return Err(AppError::BadRequest(
                "missing callId query parameter".to_string(),
            )
            .into());
        }
    };

    info!(
        "new stream connection for call {} from {:?}",
        call_id,
        req.connection_info().peer_addr()
    );

    let config = app_state.get_config();
    let session = Arc::new(CallSession::new(
        call_id.clone(),
        app_state.adapters.clone(),
        BusyPolicy::from_config(&config.audio),
    ));

    if let Err(reason) = app_state.registry.register(session.clone()) {
        warn!("stream connection refused: {}", reason);
        return Err(AppError::Conflict(reason).into());
    }

    let websocket = CallWebSocket::new(session, app_state.clone());
    match ws::start(websocket, &req, stream) {
        Ok(response) => Ok(response),
        Err(e) => {
            // The actor never started, so its teardown never runs
            app_state.registry.unregister(&call_id);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_clear_shape() {
        let json = serde_json::to_string(&StreamEvent::Clear).unwrap();
        assert_eq!(json, r#"{"event":"clear"}"#);
    }

    #[test]
    fn test_outbound_media_shape() {
        let event = StreamEvent::media_from_audio(&[0xFF, 0x7F, 0x00]);
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"event":"media","media":{"payload":"/38A"}}"#);
    }

    #[test]
    fn test_media_payload_round_trip() {
        let audio = vec![0u8, 1, 2, 254, 255];
        let event = StreamEvent::media_from_audio(&audio);
        match event {
            StreamEvent::Media { media } => {
                assert_eq!(media.decode_audio().unwrap(), audio);
            }
            _ => panic!("expected media event"),
        }
    }

    #[test]
    fn test_inbound_media_with_extra_fields() {
        // Platforms attach chunk counters and timestamps; they are ignored
        let json = r#"{"event":"media","sequenceNumber":"4","media":{"payload":"AAE=","chunk":"2","timestamp":"5"}}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        match event {
            StreamEvent::Media { media } => {
                assert_eq!(media.decode_audio().unwrap(), vec![0, 1]);
            }
            _ => panic!("expected media event"),
        }
    }

    #[test]
    fn test_inbound_informational_events() {
        let start: StreamEvent =
            serde_json::from_str(r#"{"event":"start","start":{"mediaFormat":{"encoding":"mulaw"}}}"#)
                .unwrap();
        assert_eq!(start, StreamEvent::Start);

        let connect: StreamEvent =
            serde_json::from_str(r#"{"event":"connect","protocol":"Call"}"#).unwrap();
        assert_eq!(connect, StreamEvent::Connect);

        let stop: StreamEvent = serde_json::from_str(r#"{"event":"stop"}"#).unwrap();
        assert_eq!(stop, StreamEvent::Stop);
    }

    #[test]
    fn test_malformed_messages_fail_to_parse() {
        // The handler logs and drops these; parsing itself must just error
        assert!(serde_json::from_str::<StreamEvent>("not json at all").is_err());
        assert!(serde_json::from_str::<StreamEvent>(r#"{"event":"teleport"}"#).is_err());
        assert!(serde_json::from_str::<StreamEvent>(r#"{"no_event":"media"}"#).is_err());
        // media without its payload is malformed too
        assert!(serde_json::from_str::<StreamEvent>(r#"{"event":"media"}"#).is_err());
    }

    #[test]
    fn test_invalid_base64_payload_rejected() {
        let payload = MediaPayload {
            payload: "!!not-base64!!".to_string(),
        };
        assert!(payload.decode_audio().is_err());
    }
}
