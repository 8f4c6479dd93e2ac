//! Session Processor
//!
//! One session per accepted client connection, split across two tasks:
//!
//! ```text
//!            run_requests                         run_responses
//! client ──▶ decode / rewrite / cache query ──▶ upstream
//!                    │
//!                    │ SessionEvent (bounded queue, sent before the write)
//!                    ▼
//! client ◀── cached reply or relayed reply ◀── upstream
//! ```
//!
//! The response task owns [`SessionState`]; the request task only tells it
//! what it did through the handoff queue.

mod notify;
mod processor;
mod state;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

pub use notify::{CreateNotice, CreateNotifier, DEFAULT_NOTICE_CAPACITY};
pub use processor::{ProxyShared, SessionProcessor, HANDOFF_QUEUE_DEPTH};
pub use state::{Disposition, PendingRequest, ReplyAction, SessionEvent, SessionState};

/// Process-unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Allocate the next identifier
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SessionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingHandshake,
    AwaitingAuthPreamble,
    SteadyState,
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::AwaitingHandshake => write!(f, "AwaitingHandshake"),
            SessionPhase::AwaitingAuthPreamble => write!(f, "AwaitingAuthPreamble"),
            SessionPhase::SteadyState => write!(f, "SteadyState"),
            SessionPhase::Closed => write!(f, "Closed"),
        }
    }
}

/// Per-session counters, logged when the session closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub packets_processed: u64,
    pub cache_hits: u64,
    pub rewrites: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SessionPhase::SteadyState.to_string(), "SteadyState");
    }
}
