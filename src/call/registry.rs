//! # Call Session Registry
//!
//! Process-wide table of live call sessions keyed by call identifier.
//! Creation happens when a stream connects, teardown when it disconnects or
//! errors; at every moment there is at most one live session per call
//! identifier.

use crate::call::session::{CallSession, CallSummary};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registry of active call sessions.
///
/// ## Thread Safety:
/// A single RwLock guards the identifier table: connection setup/teardown
/// take the write lock, lookups and summaries take read locks. Sessions
/// themselves are shared via Arc and own their mutable state.
pub struct CallRegistry {
    /// Live sessions mapped by call identifier
    calls: RwLock<HashMap<String, Arc<CallSession>>>,

    /// Maximum number of live calls allowed
    max_concurrent_calls: usize,
}

impl CallRegistry {
    pub fn new(max_concurrent_calls: usize) -> Self {
        Self {
            calls: RwLock::new(HashMap::new()),
            max_concurrent_calls,
        }
    }

    /// Register a session for its call identifier.
    ///
    /// ## Returns:
    /// - **Ok(())**: the session is now the live session for its call
    /// - **Err(message)**: the identifier already has a live session, or
    ///   the concurrent-call limit is reached; the caller must refuse the
    ///   connection
    pub fn register(&self, session: Arc<CallSession>) -> Result<(), String> {
        let mut calls = self.calls.write().unwrap();

        if calls.len() >= self.max_concurrent_calls {
            return Err(format!(
                "maximum concurrent calls ({}) reached",
                self.max_concurrent_calls
            ));
        }

        let call_id = session.call_id().to_string();
        if calls.contains_key(&call_id) {
            return Err(format!("call '{}' already has a live session", call_id));
        }

        calls.insert(call_id, session);
        Ok(())
    }

    /// Get the live session for a call identifier, if any.
    pub fn lookup(&self, call_id: &str) -> Option<Arc<CallSession>> {
        self.calls.read().unwrap().get(call_id).cloned()
    }

    /// Remove and close the session for a call identifier.
    ///
    /// Idempotent: removing an unknown identifier is a no-op. The session
    /// is closed on removal so any in-flight pipeline work stops emitting.
    pub fn unregister(&self, call_id: &str) -> bool {
        let removed = self.calls.write().unwrap().remove(call_id);
        match removed {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Number of live calls.
    pub fn active_call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// Identifiers of all live calls.
    pub fn active_call_ids(&self) -> Vec<String> {
        self.calls.read().unwrap().keys().cloned().collect()
    }

    /// Summaries of all live calls for the observability endpoint.
    pub fn summaries(&self) -> Vec<CallSummary> {
        self.calls
            .read()
            .unwrap()
            .values()
            .map(|session| session.summary())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ServiceAdapters;
    use crate::call::session::BusyPolicy;
    use crate::config::AppConfig;

    fn make_session(call_id: &str) -> Arc<CallSession> {
        let adapters = ServiceAdapters::from_config(&AppConfig::default()).unwrap();
        Arc::new(CallSession::new(call_id, adapters, BusyPolicy::Drop))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = CallRegistry::new(10);
        registry.register(make_session("CA100")).unwrap();

        assert!(registry.lookup("CA100").is_some());
        assert!(registry.lookup("CA999").is_none());
        assert_eq!(registry.active_call_count(), 1);
    }

    #[test]
    fn test_duplicate_call_id_refused() {
        let registry = CallRegistry::new(10);
        registry.register(make_session("CA100")).unwrap();

        let err = registry.register(make_session("CA100")).unwrap_err();
        assert!(err.contains("CA100"));
        assert_eq!(registry.active_call_count(), 1);
    }

    #[test]
    fn test_call_limit_enforced() {
        let registry = CallRegistry::new(2);
        registry.register(make_session("CA1")).unwrap();
        registry.register(make_session("CA2")).unwrap();

        assert!(registry.register(make_session("CA3")).is_err());
        assert_eq!(registry.active_call_count(), 2);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = CallRegistry::new(10);
        let session = make_session("CA100");
        registry.register(session.clone()).unwrap();

        assert!(registry.unregister("CA100"));
        assert!(session.is_closed());
        // Second removal of the same id is a clean no-op
        assert!(!registry.unregister("CA100"));
        assert!(!registry.unregister("never-registered"));
        assert_eq!(registry.active_call_count(), 0);
    }

    #[test]
    fn test_slot_freed_after_unregister() {
        let registry = CallRegistry::new(1);
        registry.register(make_session("CA1")).unwrap();
        assert!(registry.register(make_session("CA2")).is_err());

        registry.unregister("CA1");
        assert!(registry.register(make_session("CA2")).is_ok());
    }
}
