//! Metadata Proxy
//!
//! Intercepting proxy for the hrpc metadata protocol.
//!
//! ```text
//! clients ──▶ mdproxy ──▶ metadata server
//!                │
//!                └──▶ storage node relays (port_base + i)
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mdproxy::rewrite::DataNodeEndpoint;
use mdproxy::{InvalidationMode, ProxyConfig, ProxyServer};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Metadata Proxy - semantic caching and address rewriting for hrpc
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file; flags below override its values
    #[arg(long, short = 'c', env = "MDPROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Client listen address
    #[arg(long, env = "MDPROXY_LISTEN")]
    listen: Option<String>,

    /// Metadata server address (host:port)
    #[arg(long, env = "MDPROXY_UPSTREAM")]
    upstream: Option<String>,

    /// Host published in rewritten storage-node identities
    #[arg(long, env = "MDPROXY_ADVERTISE_HOST")]
    advertise_host: Option<String>,

    /// First proxy-facing storage-node port
    #[arg(long, env = "MDPROXY_PORT_BASE")]
    port_base: Option<u16>,

    /// Storage node (host:port); repeat in port order
    #[arg(
        long = "datanode",
        env = "MDPROXY_DATANODES",
        value_delimiter = ',',
        value_parser = parse_endpoint
    )]
    datanodes: Vec<DataNodeEndpoint>,

    /// Status and metrics server bind address
    #[arg(long, env = "MDPROXY_STATUS_ADDR")]
    status_addr: Option<String>,

    /// Disable the status and metrics server
    #[arg(long, env = "MDPROXY_NO_STATUS")]
    no_status: bool,

    /// Disable semantic caching
    #[arg(long, env = "MDPROXY_NO_CACHE")]
    no_cache: bool,

    /// Cached getFileInfo replies
    #[arg(long, env = "MDPROXY_FILE_STATUS_CAPACITY")]
    file_status_capacity: Option<usize>,

    /// Cached getListing replies
    #[arg(long, env = "MDPROXY_LISTING_CAPACITY")]
    listing_capacity: Option<usize>,

    /// Cache invalidation when another client creates a file
    #[arg(long, env = "MDPROXY_INVALIDATION", value_enum)]
    invalidation: Option<InvalidationMode>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

fn parse_endpoint(s: &str) -> std::result::Result<DataNodeEndpoint, String> {
    s.parse().map_err(|e: mdproxy::Error| e.to_string())
}

impl Args {
    /// Layer flag values over the file (or default) configuration
    fn apply(self, mut config: ProxyConfig) -> ProxyConfig {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(upstream) = self.upstream {
            config.upstream = upstream;
        }
        if let Some(host) = self.advertise_host {
            config.advertise_host = host;
        }
        if let Some(port) = self.port_base {
            config.port_base = port;
        }
        if !self.datanodes.is_empty() {
            config.datanodes = self.datanodes;
        }
        if let Some(addr) = self.status_addr {
            config.status_addr = Some(addr);
        }
        if self.no_status {
            config.status_addr = None;
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
        if let Some(n) = self.file_status_capacity {
            config.cache.file_status_capacity = n;
        }
        if let Some(n) = self.listing_capacity {
            config.cache.listing_capacity = n;
        }
        if let Some(mode) = self.invalidation {
            config.invalidation = mode;
        }
        config
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = match &args.config {
        Some(path) => ProxyConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ProxyConfig::default(),
    };
    let config = args.apply(config);

    info!("Starting metadata proxy");
    info!("  Listen: {}", config.listen);
    info!("  Upstream: {}", config.upstream);
    info!(
        "  Cache: {} (file status {}, listing {})",
        if config.cache.enabled { "enabled" } else { "disabled" },
        config.cache.file_status_capacity,
        config.cache.listing_capacity
    );
    info!("  Invalidation: {}", config.invalidation);
    info!("  Storage nodes: {}", config.datanodes.len());

    let server = ProxyServer::new(config).map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;

    if let Err(e) = server.run().await {
        error!("Proxy failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "h2=warn"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_file() {
        let args = Args::parse_from([
            "mdproxy",
            "--upstream",
            "nn:8020",
            "--datanode",
            "10.0.0.5:50010,10.0.0.6:50010",
            "--invalidation",
            "flush-all",
            "--no-cache",
        ]);
        let config = args.apply(ProxyConfig::default());
        assert_eq!(config.upstream, "nn:8020");
        assert_eq!(config.datanodes.len(), 2);
        assert_eq!(config.datanodes[1], DataNodeEndpoint::new("10.0.0.6", 50010));
        assert_eq!(config.invalidation, InvalidationMode::FlushAll);
        assert!(!config.cache.enabled);
        assert_eq!(config.listen, "0.0.0.0:9000");
    }
}
