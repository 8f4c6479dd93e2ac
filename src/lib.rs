//! mdproxy - Intercepting proxy for the hrpc metadata protocol
//!
//! Sits between filesystem clients and the metadata server. Read-only
//! metadata calls are answered from a semantic cache, and storage-node
//! identities announced to the server are rewritten so clients reach the
//! storage nodes through the proxy as well.
//!
//! # Architecture
//!
//! ```text
//! ┌────────┐      ┌───────────────── mdproxy ─────────────────┐      ┌──────────┐
//! │ client │ ───▶ │ SessionProcessor ──▶ CacheSet              │ ───▶ │ metadata │
//! │        │ ◀─── │        │           ──▶ rewrite engine      │ ◀─── │  server  │
//! └────────┘      │        ▼                                   │      └──────────┘
//!                 │  relay :port_base+i ─────────────────────────────▶ storage node i
//!                 └───────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`wire`] - Packet codec
//! - [`cache`] - Semantic cache engine and invalidation policies
//! - [`rewrite`] - Storage-node identity rewriting and the Location Map
//! - [`session`] - Per-connection processor
//! - [`server`] - Accept loop, upstream dialing, storage-node relays
//! - [`status`] - Cache status and metrics HTTP server
//! - [`config`] - Configuration
//! - [`metrics`] - Prometheus metrics
//! - [`error`] - Error types

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod rewrite;
pub mod server;
pub mod session;
pub mod status;
pub mod wire;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheSet, InvalidationMode, SemanticCache};
pub use config::ProxyConfig;
pub use error::{Error, Result};
pub use metrics::ProxyMetrics;
pub use rewrite::{DataNodeEndpoint, LocationMap};
pub use server::ProxyServer;
pub use session::{ProxyShared, SessionId, SessionProcessor};
