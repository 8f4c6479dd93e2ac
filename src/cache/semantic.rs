//! Semantic Cache - bounded FIFO store of request/response pairs
//!
//! # Design
//!
//! - Finished pairs live in insertion order; the oldest is evicted first
//! - Lookups scan linearly with a method-specific predicate, first match wins
//! - Requests waiting for their reply sit in a separate pending-slot map
//! - One RwLock: lookups share it, insert/evict/invalidate take it exclusively
//! - `disable()` is a lock-free one-way switch

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use super::predicate::RequestPredicate;
use crate::session::SessionId;
use crate::wire::{ResponseFrame, RpcRequest};

/// Pending slots are per connection because sequence numbers are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub session: SessionId,
    pub sequence: u32,
}

/// A completed, queryable entry
#[derive(Debug, Clone)]
pub struct CachedPair {
    pub request: RpcRequest,
    pub response: ResponseFrame,
}

#[derive(Debug, Default)]
struct CacheState {
    finished: VecDeque<CachedPair>,
    pending: HashMap<PendingKey, RpcRequest>,
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub name: &'static str,
    pub replacement_policy: &'static str,
    pub capacity: usize,
    pub current_size: usize,
    pub pending: usize,
    pub enabled: bool,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Cache for one call type.
#[derive(Debug)]
pub struct SemanticCache {
    capacity: usize,
    predicate: Box<dyn RequestPredicate>,
    enabled: AtomicBool,
    state: RwLock<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl SemanticCache {
    /// Create an enabled cache holding at most `capacity` finished pairs
    pub fn new(capacity: usize, predicate: Box<dyn RequestPredicate>) -> Self {
        Self {
            capacity,
            predicate,
            enabled: AtomicBool::new(true),
            state: RwLock::new(CacheState {
                finished: VecDeque::with_capacity(capacity.min(4096)),
                pending: HashMap::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.predicate.name()
    }

    /// Find the response to a request equivalent to `request`
    pub fn query(&self, request: &RpcRequest) -> Option<ResponseFrame> {
        if !self.is_enabled() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let found = {
            let state = self.state.read();
            state
                .finished
                .iter()
                .find(|pair| self.predicate.matches(&pair.request, request))
                .map(|pair| pair.response.clone())
        };

        match &found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Open (or overwrite) the pending slot for a request awaiting its reply
    pub fn add_request(&self, session: SessionId, request: RpcRequest) {
        let key = PendingKey {
            session,
            sequence: request.sequence,
        };
        self.state.write().pending.insert(key, request);
    }

    /// Complete the pending slot with the reply's sequence number.
    ///
    /// Returns `false` when no slot matches; the reply is then not cached.
    /// A pair equivalent to one already stored is not added again.
    pub fn add_response(&self, session: SessionId, response: ResponseFrame) -> bool {
        let key = PendingKey {
            session,
            sequence: response.sequence(),
        };

        let mut state = self.state.write();
        let Some(request) = state.pending.remove(&key) else {
            return false;
        };
        if self.capacity == 0 {
            return true;
        }
        if state
            .finished
            .iter()
            .any(|pair| self.predicate.matches(&pair.request, &request))
        {
            return true;
        }
        while state.finished.len() >= self.capacity {
            state.finished.pop_front();
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        state.finished.push_back(CachedPair { request, response });
        true
    }

    pub fn has_pending(&self, session: SessionId, sequence: u32) -> bool {
        self.state
            .read()
            .pending
            .contains_key(&PendingKey { session, sequence })
    }

    /// Drop every pending slot opened by `session`
    pub fn discard_pending(&self, session: SessionId) -> usize {
        let mut state = self.state.write();
        let before = state.pending.len();
        state.pending.retain(|key, _| key.session != session);
        before - state.pending.len()
    }

    /// Remove finished pairs whose request satisfies `doomed`
    pub fn invalidate<F>(&self, doomed: F) -> usize
    where
        F: Fn(&RpcRequest) -> bool,
    {
        let mut state = self.state.write();
        let before = state.finished.len();
        state.finished.retain(|pair| !doomed(&pair.request));
        before - state.finished.len()
    }

    /// Stop answering from this cache. One-way and idempotent.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of finished pairs
    pub fn len(&self) -> usize {
        self.state.read().finished.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Content identifiers (the first parameter of each cached request),
    /// oldest first
    pub fn identifiers(&self) -> Vec<String> {
        self.state
            .read()
            .finished
            .iter()
            .filter_map(|pair| pair.request.param(0))
            .map(|p| String::from_utf8_lossy(&p.value).into_owned())
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        let (current_size, pending) = {
            let state = self.state.read();
            (state.finished.len(), state.pending.len())
        };
        CacheStats {
            name: self.name(),
            replacement_policy: "FIFO",
            capacity: self.capacity,
            current_size,
            pending,
            enabled: self.is_enabled(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
