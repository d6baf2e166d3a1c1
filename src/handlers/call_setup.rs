//! # Call-Setup Responder
//!
//! The thin HTTP half of call establishment: when the telephony platform
//! notifies us of a new inbound call, the response is a declarative XML
//! instruction telling the platform to open a bidirectional audio stream to
//! this server, carrying the call identifier in the stream URI. The real
//! work starts when that stream connects (`/ws/call`).
//!
//! Request-signature verification is handled upstream (gateway/middleware
//! of the deployment), not here.

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::info;

/// The fields we use from the platform's form-encoded call notification.
#[derive(Debug, Deserialize)]
pub struct CallSetupRequest {
    /// Unique identifier of the inbound call
    #[serde(rename = "CallSid")]
    pub call_sid: String,

    /// Caller number, logged for traceability
    #[serde(rename = "From", default)]
    pub from: Option<String>,
}

/// Build the XML connect instruction pointing at our stream endpoint.
fn stream_instruction(public_host: &str, call_id: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Connect>
        <Stream url="wss://{}/ws/call?callId={}" />
    </Connect>
</Response>"#,
        public_host, call_id
    )
}

/// POST /voice: answer a new-call notification with the stream instruction.
pub async fn call_setup(
    state: web::Data<AppState>,
    form: web::Form<CallSetupRequest>,
) -> Result<HttpResponse, AppError> {
    let call_id = form.call_sid.trim();
    if call_id.is_empty() {
        return Err(AppError::BadRequest(
            "CallSid must not be empty".to_string(),
        ));
    }

    info!(
        "call setup for {} (from {})",
        call_id,
        form.from.as_deref().unwrap_or("unknown")
    );

    let config = state.get_config();
    let body = stream_instruction(&config.server.public_host, call_id);

    Ok(HttpResponse::Ok()
        .content_type("application/xml")
        .body(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_contains_stream_uri() {
        let xml = stream_instruction("bridge.example.com", "CA123");
        assert!(xml.contains(r#"url="wss://bridge.example.com/ws/call?callId=CA123""#));
        assert!(xml.contains("<Connect>"));
        assert!(xml.starts_with("<?xml"));
    }
}
