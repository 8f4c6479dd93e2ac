//! Proxy configuration
//!
//! Loaded from an optional YAML file; command-line flags override
//! individual fields afterwards.
//!
//! ```yaml
//! listen: 0.0.0.0:9000
//! upstream: namenode.example.com:8020
//! advertiseHost: proxy.example.com
//! portBase: 2010
//! datanodes:
//!   - address: 10.0.0.5
//!     port: 50010
//! cache:
//!   enabled: true
//!   fileStatusCapacity: 1024
//!   listingCapacity: 256
//! invalidation: parent-listing
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{CacheConfig, InvalidationMode};
use crate::error::{Error, Result};
use crate::rewrite::{DataNodeEndpoint, LocationMap};

/// Complete proxy configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Address clients connect to
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Metadata server address (`host:port`)
    #[serde(default = "default_upstream")]
    pub upstream: String,

    /// Host name published in virtualized storage-node identities
    #[serde(default = "default_advertise_host")]
    pub advertise_host: String,

    /// Address the storage-node relays bind on
    #[serde(default = "default_relay_bind")]
    pub relay_bind: String,

    /// First proxy-facing storage-node port; node *i* gets `port_base + i`
    #[serde(default = "default_port_base")]
    pub port_base: u16,

    /// Real storage nodes, in port order
    #[serde(default)]
    pub datanodes: Vec<DataNodeEndpoint>,

    /// Cache status / metrics HTTP server; disabled when absent
    #[serde(default = "default_status_addr")]
    pub status_addr: Option<String>,

    #[serde(default)]
    pub cache: CacheConfig,

    /// What other sessions drop when a file is created
    #[serde(default)]
    pub invalidation: InvalidationMode,

    /// Upstream dial attempts per client connection
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Delay before the first redial, doubled on each further attempt
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
}

fn default_listen() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_upstream() -> String {
    "127.0.0.1:8020".to_string()
}

fn default_advertise_host() -> String {
    "localhost".to_string()
}

fn default_relay_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port_base() -> u16 {
    2010
}

fn default_status_addr() -> Option<String> {
    Some("0.0.0.0:8080".to_string())
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_connect_backoff_ms() -> u64 {
    200
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            upstream: default_upstream(),
            advertise_host: default_advertise_host(),
            relay_bind: default_relay_bind(),
            port_base: default_port_base(),
            datanodes: Vec::new(),
            status_addr: default_status_addr(),
            cache: CacheConfig::default(),
            invalidation: InvalidationMode::default(),
            connect_attempts: default_connect_attempts(),
            connect_backoff_ms: default_connect_backoff_ms(),
        }
    }
}

impl ProxyConfig {
    /// Parse YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read and parse a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.listen
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("invalid listen address '{}': {}", self.listen, e)))?;
        if let Some(addr) = &self.status_addr {
            addr.parse::<SocketAddr>()
                .map_err(|e| Error::Config(format!("invalid status address '{}': {}", addr, e)))?;
        }
        if self.upstream.rsplit_once(':').is_none() {
            return Err(Error::Config(format!(
                "upstream '{}' must be host:port",
                self.upstream
            )));
        }
        if self.advertise_host.is_empty() {
            return Err(Error::Config("advertise_host must not be empty".into()));
        }
        if self.connect_attempts == 0 {
            return Err(Error::Config("connect_attempts must be >= 1".into()));
        }
        // Duplicate nodes and port overflow are reported by the map itself.
        self.location_map().map(|_| ())
    }

    /// Build the storage-node Location Map
    pub fn location_map(&self) -> Result<LocationMap> {
        LocationMap::new(
            self.advertise_host.clone(),
            self.port_base,
            self.datanodes.clone(),
        )
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }
}
