//! Storage-node Location Map
//!
//! Maps each proxy-facing port to the real storage node behind it. The
//! mapping is injective and read-only once built.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A real storage node's data endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataNodeEndpoint {
    pub address: String,
    pub port: u16,
}

impl DataNodeEndpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for DataNodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl std::str::FromStr for DataNodeEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (address, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::Config(format!("expected host:port, got '{}'", s)))?;
        if address.is_empty() {
            return Err(Error::Config(format!("missing host in '{}'", s)));
        }
        let port = port
            .parse()
            .map_err(|_| Error::Config(format!("invalid port in '{}'", s)))?;
        Ok(Self::new(address, port))
    }
}

/// Proxy port ↔ real storage node table
#[derive(Debug, Clone, Default)]
pub struct LocationMap {
    advertised_host: String,
    by_proxy_port: BTreeMap<u16, DataNodeEndpoint>,
    by_endpoint: HashMap<DataNodeEndpoint, u16>,
}

impl LocationMap {
    /// Assign consecutive proxy ports starting at `port_base`
    pub fn new(
        advertised_host: impl Into<String>,
        port_base: u16,
        endpoints: Vec<DataNodeEndpoint>,
    ) -> Result<Self> {
        let mut entries = Vec::with_capacity(endpoints.len());
        for (i, endpoint) in endpoints.into_iter().enumerate() {
            let port = u16::try_from(i)
                .ok()
                .and_then(|i| port_base.checked_add(i))
                .ok_or_else(|| {
                    Error::Config(format!(
                        "storage node #{} does not fit above port base {}",
                        i, port_base
                    ))
                })?;
            entries.push((port, endpoint));
        }
        Self::from_entries(advertised_host, entries)
    }

    /// Build from explicit `(proxy_port, endpoint)` pairs
    pub fn from_entries(
        advertised_host: impl Into<String>,
        entries: impl IntoIterator<Item = (u16, DataNodeEndpoint)>,
    ) -> Result<Self> {
        let mut map = Self {
            advertised_host: advertised_host.into(),
            ..Default::default()
        };
        for (port, endpoint) in entries {
            if map.by_proxy_port.contains_key(&port) {
                return Err(Error::Config(format!("proxy port {} assigned twice", port)));
            }
            if map.by_endpoint.contains_key(&endpoint) {
                return Err(Error::Config(format!(
                    "storage node {} listed twice",
                    endpoint
                )));
            }
            map.by_endpoint.insert(endpoint.clone(), port);
            map.by_proxy_port.insert(port, endpoint);
        }
        Ok(map)
    }

    /// Host published in virtualized identities
    pub fn advertised_host(&self) -> &str {
        &self.advertised_host
    }

    /// Proxy-facing port for a real endpoint
    pub fn proxy_port_for(&self, address: &str, port: u16) -> Option<u16> {
        // Allocation-free lookups would need a borrowed key type; maps are small.
        self.by_endpoint
            .get(&DataNodeEndpoint::new(address, port))
            .copied()
    }

    pub fn endpoint(&self, proxy_port: u16) -> Option<&DataNodeEndpoint> {
        self.by_proxy_port.get(&proxy_port)
    }

    /// Entries ordered by proxy port
    pub fn iter(&self) -> impl Iterator<Item = (u16, &DataNodeEndpoint)> {
        self.by_proxy_port.iter().map(|(port, ep)| (*port, ep))
    }

    pub fn len(&self) -> usize {
        self.by_proxy_port.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_proxy_port.is_empty()
    }
}
