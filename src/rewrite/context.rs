//! Identity substitution shared by a registration call and its reply

use super::location::DataNodeEndpoint;

/// Real and virtual identity of a registering storage node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationContext {
    pub real_name: String,
    pub real_storage_id: String,
    pub virtual_name: String,
    pub virtual_storage_id: String,
    /// Proxy-facing port standing in for the node
    pub proxy_port: u16,
    /// Endpoint the node really serves data on
    pub endpoint: DataNodeEndpoint,
}
