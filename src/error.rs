//! Error types for the metadata proxy

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the metadata proxy
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Framing Errors
    // =========================================================================
    /// Truncated or otherwise unparseable packet
    #[error("Malformed packet: {context}")]
    MalformedPacket { context: String },

    /// Frame length prefix exceeds the accepted maximum
    #[error("Frame of {len} bytes exceeds the maximum frame length")]
    FrameTooLarge { len: u32 },

    /// Connection preamble did not start with the protocol magic
    #[error("Bad protocol magic: {0:02x?}")]
    BadMagic([u8; 4]),

    /// Peer closed the connection on a frame boundary
    #[error("Connection closed by peer")]
    ConnectionClosed,

    // =========================================================================
    // Upstream Errors
    // =========================================================================
    /// Upstream server could not be reached
    #[error("Upstream {addr} unavailable after {attempts} attempts: {source}")]
    UpstreamUnavailable {
        addr: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // Rewrite Errors
    // =========================================================================
    /// A payload expected to carry a storage-node identity did not
    #[error("Rewrite failed: {0}")]
    Rewrite(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML configuration parse error
    #[error("Failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    /// Prometheus registration or encoding error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a malformed packet error
    pub fn malformed(context: impl Into<String>) -> Self {
        Error::MalformedPacket {
            context: context.into(),
        }
    }

    /// True when the error means the peer went away rather than sent garbage
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::ConnectionClosed => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
