//! Per-connection orchestration
//!
//! [`SessionProcessor::run`] relays the greeting and the auth preamble,
//! then splits both sockets and drives the two legs:
//!
//! - the request leg reads client calls, rewrites and consults the caches,
//!   queues a [`SessionEvent`] and only then writes upstream;
//! - the response leg takes one event per upstream reply, answers cache
//!   hits itself and relays everything else.
//!
//! A shared [`CancellationToken`] ends both legs as soon as either fails.

use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::notify::{CreateNotice, CreateNotifier};
use super::state::{Disposition, PendingRequest, ReplyAction, SessionEvent, SessionState};
use super::{SessionId, SessionPhase, SessionStats};
use crate::cache::{CacheSet, InvalidationPolicy};
use crate::error::{Error, Result};
use crate::metrics::ProxyMetrics;
use crate::rewrite::{
    is_rewrite_target, rewrite_auth_preamble, rewrite_request, rewrite_response,
    RegistrationContext, RewriteOutcome, RewrittenRequest, LocationMap,
};
use crate::wire::{
    read_frame, write_raw, AuthPreamble, Handshake, RawFrame, ResponseFrame, RpcRequest,
    METHOD_CREATE, METHOD_REGISTER,
};

/// Events buffered between the two legs of a session
pub const HANDOFF_QUEUE_DEPTH: usize = 64;

/// Everything sessions share
#[derive(Debug)]
pub struct ProxyShared {
    pub caches: CacheSet,
    pub locations: LocationMap,
    pub notifier: CreateNotifier,
    pub invalidation: Box<dyn InvalidationPolicy>,
    pub metrics: ProxyMetrics,
}

impl ProxyShared {
    pub fn new(
        caches: CacheSet,
        locations: LocationMap,
        invalidation: Box<dyn InvalidationPolicy>,
        metrics: ProxyMetrics,
    ) -> Self {
        Self {
            caches,
            locations,
            notifier: CreateNotifier::default(),
            invalidation,
            metrics,
        }
    }
}

/// Drives one client connection and its upstream connection.
pub struct SessionProcessor {
    id: SessionId,
    shared: Arc<ProxyShared>,
}

impl SessionProcessor {
    pub fn new(id: SessionId, shared: Arc<ProxyShared>) -> Self {
        Self { id, shared }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Run the session to completion.
    ///
    /// Returns the session's counters once both legs have stopped. Either
    /// socket closing ends the session and drops both connections.
    pub async fn run<C, U>(self, mut client: C, mut upstream: U) -> Result<SessionStats>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        U: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.id;
        // Subscribe before any call can complete so no notice is missed.
        let notices = self.shared.notifier.subscribe();

        debug!(session = %id, phase = %SessionPhase::AwaitingHandshake, "Session phase");
        let handshake = Handshake::read(&mut client).await?;
        handshake.write(&mut upstream).await?;
        debug!(
            session = %id,
            version = handshake.version,
            auth_method = handshake.auth_method,
            "Relayed handshake"
        );

        debug!(session = %id, phase = %SessionPhase::AwaitingAuthPreamble, "Session phase");
        let preamble = read_frame(&mut client).await?;
        let registration = self.relay_preamble(preamble, &mut upstream).await?;

        debug!(session = %id, phase = %SessionPhase::SteadyState, "Session phase");
        let (client_rd, client_wr) = tokio::io::split(client);
        let (upstream_rd, upstream_wr) = tokio::io::split(upstream);
        let (tx, rx) = mpsc::channel(HANDOFF_QUEUE_DEPTH);
        let cancel = CancellationToken::new();

        let requests = RequestLeg {
            id,
            shared: self.shared.clone(),
            client: client_rd,
            upstream: upstream_wr,
            events: tx,
            cancel: cancel.clone(),
        };
        let request_task = tokio::spawn(requests.run());

        let mut responses = ResponseLeg {
            id,
            shared: self.shared.clone(),
            upstream: BufReader::new(upstream_rd),
            upstream_ready: false,
            client: client_wr,
            events: rx,
            notices,
            notices_open: true,
            state: SessionState::new(registration),
            cancel: cancel.clone(),
        };
        let response_result = responses.run().await;
        cancel.cancel();

        let request_result = request_task
            .await
            .map_err(|e| Error::Internal(format!("request task failed: {}", e)))?;

        let stats = responses.state.stats();
        let released = self.shared.caches.discard_session(id);
        info!(
            session = %id,
            phase = %SessionPhase::Closed,
            packets = stats.packets_processed,
            cache_hits = stats.cache_hits,
            rewrites = stats.rewrites,
            pending_released = released,
            "Session closed"
        );

        response_result.and(request_result).map(|()| stats)
    }

    /// Forward the auth preamble, rewriting an embedded registration
    async fn relay_preamble<U>(
        &self,
        frame: RawFrame,
        upstream: &mut U,
    ) -> Result<Option<RegistrationContext>>
    where
        U: AsyncWrite + Unpin,
    {
        let preamble = match AuthPreamble::decode(frame.body()) {
            Ok(p) => p,
            Err(e) => {
                warn!(session = %self.id, error = %e, "Undecodable auth preamble, forwarding as-is");
                write_raw(upstream, frame.as_bytes()).await?;
                return Ok(None);
            }
        };

        match rewrite_auth_preamble(&preamble, &self.shared.locations) {
            RewriteOutcome::Rewritten((rewritten, ctx)) => {
                info!(
                    session = %self.id,
                    real = %ctx.real_name,
                    virtual_name = %ctx.virtual_name,
                    "Rewrote registration in auth preamble"
                );
                self.shared
                    .metrics
                    .rewrites
                    .with_label_values(&[METHOD_REGISTER, "rewritten"])
                    .inc();
                write_raw(upstream, &rewritten.encode()?).await?;
                Ok(Some(ctx))
            }
            RewriteOutcome::Skipped(reason) => {
                warn!(session = %self.id, %reason, "Registration in auth preamble left unchanged");
                self.shared
                    .metrics
                    .rewrites
                    .with_label_values(&[METHOD_REGISTER, "skipped"])
                    .inc();
                write_raw(upstream, frame.as_bytes()).await?;
                Ok(None)
            }
            RewriteOutcome::Unchanged => {
                write_raw(upstream, frame.as_bytes()).await?;
                Ok(None)
            }
        }
    }
}

/// Resolves to `None` once `cancel` fires
async fn or_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

// =============================================================================
// Client -> upstream
// =============================================================================

struct RequestLeg<C, U> {
    id: SessionId,
    shared: Arc<ProxyShared>,
    client: ReadHalf<C>,
    upstream: WriteHalf<U>,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl<C, U> RequestLeg<C, U>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(mut self) -> Result<()> {
        match self.run_requests().await {
            // Let the response leg drain what is already queued.
            Ok(()) => {
                let _ = self.events.try_send(SessionEvent::CloseConnection);
                Ok(())
            }
            Err(e) => {
                self.cancel.cancel();
                if e.is_disconnect() {
                    debug!(session = %self.id, error = %e, "Upstream write failed");
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn run_requests(&mut self) -> Result<()> {
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = self.events.closed() => return Ok(()),
                frame = read_frame(&mut self.client) => frame,
            };
            let frame = match frame {
                Ok(f) => f,
                Err(e) if e.is_disconnect() => {
                    debug!(session = %self.id, "Client closed connection");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let (pending, outgoing) = self.process(frame)?;
            debug!(session = %self.id, request = %pending.request, "Forwarding call");

            let queued = or_cancelled(
                &self.cancel,
                self.events.send(SessionEvent::RequestAvailable(pending)),
            )
            .await;
            match queued {
                Some(Ok(())) => {}
                // Response leg is gone; the session is over.
                Some(Err(_)) | None => return Ok(()),
            }

            match or_cancelled(&self.cancel, write_raw(&mut self.upstream, &outgoing)).await {
                Some(result) => result?,
                None => return Ok(()),
            }
            self.shared
                .metrics
                .packets_relayed
                .with_label_values(&["request"])
                .inc();
        }
    }

    /// Decide what happens to one client call; returns the event for the
    /// response leg and the bytes to forward upstream.
    fn process(&self, frame: RawFrame) -> Result<(PendingRequest, bytes::Bytes)> {
        let mut request = RpcRequest::decode(frame.body())?;
        let mut outgoing = frame.into_bytes();
        let mut rewritten = false;
        let mut registration = None;

        if is_rewrite_target(&request.method) {
            match rewrite_request(&request, &self.shared.locations) {
                RewriteOutcome::Rewritten(RewrittenRequest {
                    request: patched,
                    registration: ctx,
                }) => {
                    debug!(session = %self.id, method = %patched.method, "Rewrote node identity");
                    outgoing = patched.encode()?;
                    request = patched;
                    rewritten = true;
                    registration = ctx;
                    self.count_rewrite(&request.method, "rewritten");
                }
                RewriteOutcome::Skipped(reason) => {
                    warn!(
                        session = %self.id,
                        method = %request.method,
                        %reason,
                        "Forwarding node identity unchanged"
                    );
                    self.count_rewrite(&request.method, "skipped");
                }
                RewriteOutcome::Unchanged => {}
            }
        }

        let disposition = match self.shared.caches.for_method(&request.method) {
            Some(cache) if cache.is_enabled() => match cache.query(&request) {
                Some(hit) => {
                    self.count_lookup(cache.name(), "hit");
                    Disposition::CacheHit(hit)
                }
                None => {
                    self.count_lookup(cache.name(), "miss");
                    cache.add_request(self.id, request.clone());
                    Disposition::CacheMiss
                }
            },
            _ => Disposition::Forward,
        };

        let mut pending = PendingRequest::new(request, disposition);
        pending.rewritten = rewritten;
        pending.registration = registration;
        Ok((pending, outgoing))
    }

    fn count_rewrite(&self, method: &str, outcome: &str) {
        self.shared
            .metrics
            .rewrites
            .with_label_values(&[method, outcome])
            .inc();
    }

    fn count_lookup(&self, cache: &str, outcome: &str) {
        self.shared
            .metrics
            .cache_lookups
            .with_label_values(&[cache, outcome])
            .inc();
    }
}

// =============================================================================
// Upstream -> client
// =============================================================================

struct ResponseLeg<U, C> {
    id: SessionId,
    shared: Arc<ProxyShared>,
    upstream: BufReader<ReadHalf<U>>,
    /// Upstream bytes are buffered ahead of the next event
    upstream_ready: bool,
    client: WriteHalf<C>,
    events: mpsc::Receiver<SessionEvent>,
    notices: broadcast::Receiver<CreateNotice>,
    notices_open: bool,
    state: SessionState,
    cancel: CancellationToken,
}

impl<U, C> ResponseLeg<U, C>
where
    U: AsyncRead + AsyncWrite + Unpin,
    C: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(&mut self) -> Result<()> {
        let result = self.run_responses().await;
        self.cancel.cancel();
        match result {
            Err(e) if e.is_disconnect() => {
                debug!(session = %self.id, "Upstream closed connection");
                Ok(())
            }
            other => other,
        }
    }

    async fn run_responses(&mut self) -> Result<()> {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                notice = self.notices.recv(), if self.notices_open => {
                    self.on_notice(notice);
                    continue;
                }
                // Watch for EOF while no call is outstanding.
                ready = self.upstream.fill_buf(), if !self.upstream_ready => {
                    if ready?.is_empty() {
                        debug!(session = %self.id, "Upstream closed while idle");
                        return Ok(());
                    }
                    self.upstream_ready = true;
                    continue;
                }
                event = self.events.recv() => event,
            };

            match event {
                Some(SessionEvent::RequestAvailable(pending)) => {
                    match or_cancelled(&self.cancel.clone(), self.relay(pending)).await {
                        Some(result) => result?,
                        None => return Ok(()),
                    }
                }
                Some(SessionEvent::CloseConnection) | None => return Ok(()),
            }
        }
    }

    /// Deliver the answer to one forwarded call
    async fn relay(&mut self, pending: PendingRequest) -> Result<()> {
        let sequence = pending.sequence();
        let method = pending.method().to_string();

        if let Some(cached) = self.state.begin(pending) {
            write_raw(&mut self.client, &cached.bytes_for(sequence)?).await?;
            debug!(session = %self.id, sequence, %method, "Answered from cache");
        }

        let raw = read_frame(&mut self.upstream).await?;
        self.upstream_ready = false;
        let reply = ResponseFrame::decode(Some(&method), raw)?;

        let pending = match self.state.complete(reply.sequence()) {
            ReplyAction::Discard => {
                debug!(session = %self.id, sequence, "Discarded upstream reply to cached call");
                return Ok(());
            }
            ReplyAction::DiscardMismatch { expected } => {
                warn!(
                    session = %self.id,
                    expected = ?expected,
                    received = reply.sequence(),
                    %method,
                    "Reply to cached call does not match the outstanding call, discarding"
                );
                self.shared.metrics.contract_violations.inc();
                return Ok(());
            }
            ReplyAction::Mismatch { expected } => {
                warn!(
                    session = %self.id,
                    expected = ?expected,
                    received = reply.sequence(),
                    %method,
                    "Reply does not match the outstanding call, relaying uncached"
                );
                self.shared.metrics.contract_violations.inc();
                return self.send(reply.raw.as_bytes()).await;
            }
            ReplyAction::Relay(pending) => pending,
        };

        if matches!(pending.disposition, Disposition::CacheMiss) {
            if let Some(cache) = self.shared.caches.for_method(&method) {
                if !cache.add_response(self.id, reply.clone()) {
                    warn!(session = %self.id, sequence, %method, "No pending slot for reply");
                    self.shared.metrics.contract_violations.inc();
                }
            }
        }

        if method == METHOD_CREATE && reply.response.is_success() {
            if let Some(path) = pending.request.first_path() {
                let receivers = self.shared.notifier.publish(self.id, path);
                debug!(session = %self.id, path, receivers, "Published create");
            }
        }

        if method == METHOD_REGISTER {
            let ctx = pending.registration.as_ref().or(self.state.registration());
            match rewrite_response(&method, &reply.response, ctx) {
                RewriteOutcome::Rewritten(response) => {
                    let bytes = response.encode()?;
                    self.state.record_rewrite();
                    self.shared
                        .metrics
                        .rewrites
                        .with_label_values(&["registration-reply", "rewritten"])
                        .inc();
                    return self.send(&bytes).await;
                }
                RewriteOutcome::Skipped(reason) => {
                    warn!(session = %self.id, %reason, "Registration reply left unchanged");
                    self.shared
                        .metrics
                        .rewrites
                        .with_label_values(&["registration-reply", "skipped"])
                        .inc();
                }
                RewriteOutcome::Unchanged => {}
            }
        }

        self.send(reply.raw.as_bytes()).await
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        write_raw(&mut self.client, bytes).await?;
        self.shared
            .metrics
            .packets_relayed
            .with_label_values(&["response"])
            .inc();
        Ok(())
    }

    fn on_notice(&mut self, notice: std::result::Result<CreateNotice, broadcast::error::RecvError>) {
        match notice {
            Ok(notice) if notice.origin == self.id => {}
            Ok(notice) => {
                let removed = self
                    .shared
                    .invalidation
                    .on_create(&notice.path, &self.shared.caches);
                if removed > 0 {
                    self.shared.metrics.invalidations.inc_by(removed as u64);
                    debug!(
                        session = %self.id,
                        origin = %notice.origin,
                        path = %notice.path,
                        removed,
                        "Invalidated cached entries"
                    );
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(session = %self.id, missed, "Missed create notices");
            }
            Err(broadcast::error::RecvError::Closed) => self.notices_open = false,
        }
    }
}
