//! Per-connection state and the events that feed it

use super::SessionStats;
use crate::rewrite::RegistrationContext;
use crate::wire::{ResponseFrame, RpcRequest};

/// What the request task did with a call
#[derive(Debug, Clone)]
pub enum Disposition {
    /// Not cacheable, or caching disabled
    Forward,
    /// Cacheable; a pending slot waits for the reply
    CacheMiss,
    /// Answered from cache; the upstream reply is to be discarded
    CacheHit(ResponseFrame),
}

/// A call forwarded upstream, as seen by the response task
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request: RpcRequest,
    pub disposition: Disposition,
    /// Identity substituted before forwarding
    pub rewritten: bool,
    pub registration: Option<RegistrationContext>,
}

impl PendingRequest {
    pub fn new(request: RpcRequest, disposition: Disposition) -> Self {
        Self {
            request,
            disposition,
            rewritten: false,
            registration: None,
        }
    }

    pub fn method(&self) -> &str {
        &self.request.method
    }

    pub fn sequence(&self) -> u32 {
        self.request.sequence
    }
}

/// Handoff queue message from the request task to the response task
#[derive(Debug, Clone)]
pub enum SessionEvent {
    RequestAvailable(PendingRequest),
    CloseConnection,
}

/// How to treat the next upstream reply
#[derive(Debug)]
pub enum ReplyAction {
    /// The client already has a cached answer
    Discard,
    /// The client already has a cached answer, and the reply carries an
    /// unexpected sequence number
    DiscardMismatch { expected: Option<u32> },
    Relay(PendingRequest),
    /// Sequence number differs from the outstanding call
    Mismatch { expected: Option<u32> },
}

/// State of one session, owned by its response task
#[derive(Debug, Default)]
pub struct SessionState {
    outstanding_sequence: Option<u32>,
    pending_request: Option<PendingRequest>,
    skip_next_response: bool,
    registration: Option<RegistrationContext>,
    stats: SessionStats,
}

impl SessionState {
    pub fn new(registration: Option<RegistrationContext>) -> Self {
        Self {
            registration,
            ..Default::default()
        }
    }

    /// Record the next forwarded call. Returns the cached reply to send
    /// the client right away, if the call was a cache hit.
    pub fn begin(&mut self, pending: PendingRequest) -> Option<ResponseFrame> {
        self.stats.packets_processed += 1;
        if pending.rewritten {
            self.stats.rewrites += 1;
        }
        if let Some(ctx) = &pending.registration {
            self.registration = Some(ctx.clone());
        }

        self.outstanding_sequence = Some(pending.sequence());
        let cached = match &pending.disposition {
            Disposition::CacheHit(response) => {
                self.stats.cache_hits += 1;
                Some(response.clone())
            }
            _ => None,
        };
        self.skip_next_response = cached.is_some();
        self.pending_request = Some(pending);
        cached
    }

    /// Classify the upstream reply numbered `reply_sequence`
    pub fn complete(&mut self, reply_sequence: u32) -> ReplyAction {
        let expected = self.outstanding_sequence.take();
        let skip = std::mem::take(&mut self.skip_next_response);
        let pending = self.pending_request.take();
        let matches = pending.is_some() && expected == Some(reply_sequence);
        match (skip, pending) {
            // A cached answer went out already; never send a second one.
            (true, _) if matches => ReplyAction::Discard,
            (true, _) => ReplyAction::DiscardMismatch { expected },
            (false, Some(pending)) if matches => ReplyAction::Relay(pending),
            (false, _) => ReplyAction::Mismatch { expected },
        }
    }

    pub fn record_rewrite(&mut self) {
        self.stats.rewrites += 1;
    }

    pub fn registration(&self) -> Option<&RegistrationContext> {
        self.registration.as_ref()
    }

    pub fn skip_next_response(&self) -> bool {
        self.skip_next_response
    }

    pub fn outstanding_sequence(&self) -> Option<u32> {
        self.outstanding_sequence
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }
}
