//! # Reply Adapter
//!
//! Turns a caller utterance plus the dialogue so far into the agent's next
//! line, over an OpenAI-compatible `/chat/completions` endpoint.
//!
//! ## Contract:
//! Input is the ordered turn history (not including the new utterance) and
//! the new utterance text; output is the reply text. Transport or auth
//! failures surface as `AdapterError::ReplyGeneration`; the call session
//! substitutes a deterministic fallback, so this error never reaches the
//! socket.

use crate::conversation::Turn;
use crate::error::AdapterError;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Backend for generating the agent's reply to a caller utterance.
#[async_trait]
pub trait ReplyBackend: Send + Sync {
    /// Generate a reply to `utterance` given the prior dialogue history.
    async fn generate(&self, history: &[Turn], utterance: &str) -> Result<String, AdapterError>;

    /// Short backend name for logs and health reporting.
    fn name(&self) -> &'static str;
}

/// Production backend: OpenAI-compatible chat completion API.
pub struct HttpReplyGenerator {
    base_url: String,
    api_key: String,
    model: String,
    system_prompt: String,
    client: reqwest::Client,
}

impl HttpReplyGenerator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            system_prompt: system_prompt.into(),
            client,
        })
    }

    /// Build the chat message list: system prompt, then the dialogue in
    /// insertion order, then the new utterance as the latest user message.
    fn build_messages(&self, history: &[Turn], utterance: &str) -> serde_json::Value {
        let mut messages = vec![json!({
            "role": "system",
            "content": self.system_prompt,
        })];

        for turn in history {
            messages.push(json!({
                "role": turn.role.as_chat_role(),
                "content": turn.text,
            }));
        }

        messages.push(json!({
            "role": "user",
            "content": utterance,
        }));

        serde_json::Value::Array(messages)
    }
}

#[async_trait]
impl ReplyBackend for HttpReplyGenerator {
    async fn generate(&self, history: &[Turn], utterance: &str) -> Result<String, AdapterError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": self.build_messages(history, utterance),
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::ReplyGeneration(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("reply API error {}: {}", status, body);
            return Err(AdapterError::ReplyGeneration(format!(
                "reply API returned {}",
                status
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AdapterError::ReplyGeneration(e.to_string()))?;

        let reply = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                AdapterError::ReplyGeneration("reply API response had no content".to_string())
            })?;

        debug!(
            "generated reply: {} history turns, {} chars in, {} chars out",
            history.len(),
            utterance.len(),
            reply.len()
        );
        Ok(reply)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Backend used when no reply service is configured: echoes the utterance
/// back, mirroring the fallback the session applies on service failure.
#[derive(Debug, Default)]
pub struct EchoReply;

#[async_trait]
impl ReplyBackend for EchoReply {
    async fn generate(&self, _history: &[Turn], utterance: &str) -> Result<String, AdapterError> {
        Ok(format!("You said: {}", utterance))
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ConversationHistory, Role};

    #[tokio::test]
    async fn test_echo_reply() {
        let backend = EchoReply;
        let reply = backend.generate(&[], "book a ride").await.unwrap();
        assert_eq!(reply, "You said: book a ride");
    }

    #[test]
    fn test_message_order() {
        let generator = HttpReplyGenerator::new(
            "https://api.example.com/v1",
            "key",
            "model",
            "Be brief.",
            Duration::from_secs(5),
        )
        .unwrap();

        let history = ConversationHistory::new();
        history.append(Role::Caller, "hello");
        history.append(Role::Agent, "hi, how can I help?");

        let messages = generator.build_messages(&history.snapshot(), "book a ride");
        let messages = messages.as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "hello");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3]["role"], "user");
        assert_eq!(messages[3]["content"], "book a ride");
    }
}
