//! Proxy server
//!
//! Accepts client connections, dials the metadata server for each and
//! hands both sockets to a [`SessionProcessor`]. Also runs one byte relay
//! per storage node so the virtualized endpoints published to clients
//! are reachable.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::cache::CacheSet;
use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use crate::metrics::ProxyMetrics;
use crate::rewrite::DataNodeEndpoint;
use crate::session::{ProxyShared, SessionId, SessionProcessor};
use crate::status::run_status_server;

/// Pause before accepting again after a failed accept (e.g. out of descriptors)
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Dial `addr`, retrying with doubling delays.
pub async fn dial_upstream(addr: &str, attempts: u32, backoff: Duration) -> Result<TcpStream> {
    let attempts = attempts.max(1);
    let mut delay = backoff;
    let mut attempt = 1;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) if attempt >= attempts => {
                return Err(Error::UpstreamUnavailable {
                    addr: addr.to_string(),
                    attempts,
                    source: e,
                });
            }
            Err(e) => {
                debug!(upstream = addr, attempt, error = %e, "Upstream dial failed, retrying");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
        }
    }
}

/// Forward every connection on `listener` to `target`, byte for byte
pub async fn run_relay(
    listener: TcpListener,
    target: DataNodeEndpoint,
    metrics: ProxyMetrics,
) -> Result<()> {
    loop {
        let (mut inbound, peer) = listener.accept().await?;
        metrics.relay_connections.inc();
        let target = target.clone();

        tokio::spawn(async move {
            let mut outbound = match TcpStream::connect((target.address.as_str(), target.port)).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(peer = %peer, target = %target, error = %e, "Storage node unreachable");
                    return;
                }
            };
            match tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await {
                Ok((up, down)) => {
                    debug!(peer = %peer, target = %target, up, down, "Relay connection closed")
                }
                Err(e) => debug!(peer = %peer, target = %target, error = %e, "Relay connection ended"),
            }
        });
    }
}

/// The metadata proxy: client listener, storage-node relays, status server
pub struct ProxyServer {
    config: ProxyConfig,
    shared: Arc<ProxyShared>,
}

impl ProxyServer {
    /// Validate `config` and build the shared state
    pub fn new(config: ProxyConfig) -> Result<Self> {
        config.validate()?;
        let shared = ProxyShared::new(
            CacheSet::new(&config.cache),
            config.location_map()?,
            config.invalidation.build(),
            ProxyMetrics::new()?,
        );
        Ok(Self {
            config,
            shared: Arc::new(shared),
        })
    }

    pub fn shared(&self) -> Arc<ProxyShared> {
        self.shared.clone()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Bind every listener, then serve until the client listener fails.
    ///
    /// Bind failures are returned before anything is served.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen).await.map_err(|e| {
            Error::Config(format!("failed to bind {}: {}", self.config.listen, e))
        })?;

        let relays = self.bind_relays().await?;
        for (listener, target) in relays {
            let metrics = self.shared.metrics.clone();
            tokio::spawn(async move {
                let port = listener.local_addr().map(|a| a.port()).unwrap_or_default();
                if let Err(e) = run_relay(listener, target.clone(), metrics).await {
                    error!(port, target = %target, "Relay listener failed: {}", e);
                }
            });
        }

        if let Some(addr) = &self.config.status_addr {
            let status = TcpListener::bind(addr)
                .await
                .map_err(|e| Error::Config(format!("failed to bind status server {}: {}", addr, e)))?;
            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(e) = run_status_server(status, shared).await {
                    error!("Status server error: {}", e);
                }
            });
        }

        self.serve(listener).await
    }

    async fn bind_relays(&self) -> Result<Vec<(TcpListener, DataNodeEndpoint)>> {
        let mut relays = Vec::with_capacity(self.shared.locations.len());
        for (port, target) in self.shared.locations.iter() {
            let addr = format!("{}:{}", self.config.relay_bind, port);
            let listener = TcpListener::bind(&addr)
                .await
                .map_err(|e| Error::Config(format!("failed to bind relay {}: {}", addr, e)))?;
            info!(listen = %addr, target = %target, "Storage node relay");
            relays.push((listener, target.clone()));
        }
        Ok(relays)
    }

    /// Accept client connections on `listener`
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        info!(
            listen = %local,
            upstream = %self.config.upstream,
            invalidation = %self.config.invalidation,
            "Metadata proxy listening"
        );

        loop {
            match listener.accept().await {
                Ok((client, peer)) => self.spawn_session(client, peer),
                Err(e) => accept_failed(&e).await,
            }
        }
    }

    fn spawn_session(&self, client: TcpStream, peer: SocketAddr) {
        let shared = self.shared.clone();
        let upstream_addr = self.config.upstream.clone();
        let attempts = self.config.connect_attempts;
        let backoff = self.config.connect_backoff();

        tokio::spawn(async move {
            let id = SessionId::next();
            shared.metrics.connections_total.inc();
            let _ = client.set_nodelay(true);
            info!(session = %id, peer = %peer, "Client connected");

            let upstream = match dial_upstream(&upstream_addr, attempts, backoff).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(session = %id, peer = %peer, "Closing client: {}", e);
                    return;
                }
            };

            shared.metrics.active_sessions.inc();
            let metrics = shared.metrics.clone();
            match SessionProcessor::new(id, shared).run(client, upstream).await {
                Ok(_) => {}
                Err(e) if e.is_disconnect() => debug!(session = %id, "Session ended: {}", e),
                Err(e) => warn!(session = %id, peer = %peer, "Session error: {}", e),
            }
            metrics.active_sessions.dec();
        });
    }
}

async fn accept_failed(e: &std::io::Error) {
    error!("Accept error: {}", e);
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}
