//! # Call Management Module
//!
//! Per-call session state and the process-wide registry of live calls.
//!
//! ## Key Components:
//! - **Call Session**: one per active call; owns the conversation history
//!   and the turn-taking state machine that serializes
//!   transcription → reply → synthesis → playback
//! - **Call Registry**: the only process-wide table; maps call identifiers
//!   to live sessions, enforcing identifier uniqueness and the
//!   concurrent-call limit
//!
//! Everything a session owns (history, machine state, counters) is touched
//! only through that session's own processing path; sessions of different
//! calls never share mutable state.

pub mod registry;
pub mod session;

pub use registry::CallRegistry;
pub use session::{BusyPolicy, CallSession, CallState, FrameDisposition};
