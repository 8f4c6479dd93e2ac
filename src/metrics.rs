//! Prometheus metrics for the proxy
//!
//! Each proxy instance owns its own [`Registry`] so several can coexist in
//! one process (tests start many).

use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::error::Result;

/// Counters and gauges updated by sessions and relays
#[derive(Debug, Clone)]
pub struct ProxyMetrics {
    registry: Registry,
    /// Client connections accepted
    pub connections_total: IntCounter,
    /// Sessions currently open
    pub active_sessions: IntGauge,
    /// Packets relayed, by `direction` (request / response)
    pub packets_relayed: IntCounterVec,
    /// Cache lookups, by `cache` and `outcome` (hit / miss)
    pub cache_lookups: IntCounterVec,
    /// Identity rewrites, by `method` and `outcome` (rewritten / skipped)
    pub rewrites: IntCounterVec,
    /// Replies that did not match the outstanding call
    pub contract_violations: IntCounter,
    /// Cached pairs dropped after a create elsewhere
    pub invalidations: IntCounter,
    /// Storage-node relay connections accepted
    pub relay_connections: IntCounter,
}

impl ProxyMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let connections_total = IntCounter::new(
            "mdproxy_connections_total",
            "Total number of client connections accepted",
        )?;
        let active_sessions =
            IntGauge::new("mdproxy_active_sessions", "Number of open client sessions")?;
        let packets_relayed = IntCounterVec::new(
            Opts::new("mdproxy_packets_relayed_total", "Packets relayed"),
            &["direction"],
        )?;
        let cache_lookups = IntCounterVec::new(
            Opts::new("mdproxy_cache_lookups_total", "Semantic cache lookups"),
            &["cache", "outcome"],
        )?;
        let rewrites = IntCounterVec::new(
            Opts::new("mdproxy_rewrites_total", "Storage-node identity rewrites"),
            &["method", "outcome"],
        )?;
        let contract_violations = IntCounter::new(
            "mdproxy_contract_violations_total",
            "Replies whose sequence number did not match the outstanding call",
        )?;
        let invalidations = IntCounter::new(
            "mdproxy_cache_invalidations_total",
            "Cached pairs removed after a file was created",
        )?;
        let relay_connections = IntCounter::new(
            "mdproxy_relay_connections_total",
            "Storage-node relay connections accepted",
        )?;

        registry.register(Box::new(connections_total.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(packets_relayed.clone()))?;
        registry.register(Box::new(cache_lookups.clone()))?;
        registry.register(Box::new(rewrites.clone()))?;
        registry.register(Box::new(contract_violations.clone()))?;
        registry.register(Box::new(invalidations.clone()))?;
        registry.register(Box::new(relay_connections.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            active_sessions,
            packets_relayed,
            cache_lookups,
            rewrites,
            contract_violations,
            invalidations,
            relay_connections,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_registries() {
        let a = ProxyMetrics::new().unwrap();
        let b = ProxyMetrics::new().unwrap();
        a.connections_total.inc();
        assert_eq!(a.connections_total.get(), 1);
        assert_eq!(b.connections_total.get(), 0);
    }

    #[test]
    fn test_encode_text() {
        let metrics = ProxyMetrics::new().unwrap();
        metrics
            .cache_lookups
            .with_label_values(&["file-status", "hit"])
            .inc();
        let (content_type, body) = metrics.encode().unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("mdproxy_cache_lookups_total{cache=\"file-status\",outcome=\"hit\"} 1"));
    }
}
