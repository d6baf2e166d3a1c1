//! # Conversation State Store
//!
//! Per-call dialogue history: an append-only, ordered list of turns used as
//! context for reply generation. The history lives exactly as long as its
//! call session; nothing is persisted across calls.

use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Caller,
    Agent,
}

impl Role {
    /// Role name in the chat-message convention the reply service expects.
    pub fn as_chat_role(&self) -> &'static str {
        match self {
            Role::Caller => "user",
            Role::Agent => "assistant",
        }
    }
}

/// One utterance in the dialogue. Immutable once appended; insertion order
/// is the order handed to the reply generator.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only turn history for a single call.
///
/// ## Thread Safety:
/// The Mutex lets the pipeline task append while observability code reads a
/// snapshot; neither path holds the lock across an await point.
#[derive(Debug, Default)]
pub struct ConversationHistory {
    turns: Mutex<Vec<Turn>>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one turn to the history.
    pub fn append(&self, role: Role, text: impl Into<String>) {
        let mut turns = self.turns.lock().unwrap();
        turns.push(Turn {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        });
    }

    /// Ordered copy of the history, used to build reply-service context.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.lock().unwrap().clone()
    }

    /// Number of turns recorded so far.
    pub fn len(&self) -> usize {
        self.turns.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order() {
        let history = ConversationHistory::new();
        history.append(Role::Caller, "book a ride");
        history.append(Role::Agent, "Sure, let's get that scheduled.");
        history.append(Role::Caller, "thanks");

        let turns = history.snapshot();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].role, Role::Caller);
        assert_eq!(turns[0].text, "book a ride");
        assert_eq!(turns[1].role, Role::Agent);
        assert_eq!(turns[2].text, "thanks");
    }

    #[test]
    fn test_snapshot_is_detached() {
        let history = ConversationHistory::new();
        history.append(Role::Caller, "hello");
        let snapshot = history.snapshot();
        history.append(Role::Agent, "hi there");

        // The earlier snapshot does not grow
        assert_eq!(snapshot.len(), 1);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_chat_role_mapping() {
        assert_eq!(Role::Caller.as_chat_role(), "user");
        assert_eq!(Role::Agent.as_chat_role(), "assistant");
    }
}
