//! Transport error types
//!
//! Failures below the tree layer: sockets, framing, CRC, timers. Tree-level
//! errors stay in `emberplus_types::EmberError`; the services translate at
//! the boundary.

use std::net::SocketAddr;
use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Network connectivity errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connection management errors
    #[error("Connection error: {message} (remote: {remote_addr:?})")]
    Connection {
        message: String,
        remote_addr: Option<SocketAddr>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// S101 framing errors: bad CRC, malformed header, oversized frame
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Transport timeout errors
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// A peer task ended and its channel is gone
    #[error("Channel closed: {context}")]
    ChannelClosed { context: String },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn connection(message: impl Into<String>, remote_addr: Option<SocketAddr>) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr,
            source: None,
        }
    }

    pub fn connection_with_source(
        message: impl Into<String>,
        remote_addr: Option<SocketAddr>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr,
            source: Some(Box::new(source)),
        }
    }

    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn channel_closed(context: impl Into<String>) -> Self {
        Self::ChannelClosed {
            context: context.into(),
        }
    }

    /// Whether retrying the failed operation can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network { .. } => true,
            TransportError::Connection { .. } => true,
            TransportError::Timeout { .. } => true,
            TransportError::Io { .. } => true,
            TransportError::Frame { .. } => false,
            TransportError::Configuration { .. } => false,
            TransportError::ChannelClosed { .. } => false,
        }
    }

    /// Error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::Network { .. } => "network",
            TransportError::Connection { .. } => "connection",
            TransportError::Frame { .. } => "frame",
            TransportError::Configuration { .. } => "configuration",
            TransportError::Timeout { .. } => "timeout",
            TransportError::ChannelClosed { .. } => "channel_closed",
            TransportError::Io { .. } => "io",
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        TransportError::Io {
            message: error.to_string(),
            source: error,
        }
    }
}
