//! Core error types for termbridge

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors establishing a connection to the remote endpoint
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The remote refused the TCP connection
    #[error("Connection refused by {0}")]
    Refused(String),

    /// The connection attempt did not finish in time
    #[error("Connection to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    /// The host name could not be resolved
    #[error("Could not resolve {host}: {reason}")]
    Dns { host: String, reason: String },

    /// The WebSocket upgrade was rejected or failed
    #[error("WebSocket handshake with {address} failed: {reason}")]
    Handshake { address: String, reason: String },

    /// The endpoint string could not be parsed
    #[error("Invalid endpoint '{input}': {reason}")]
    InvalidEndpoint { input: String, reason: String },

    /// Other socket error
    #[error("Connection to {address} failed: {reason}")]
    Io { address: String, reason: String },
}

impl ConnectError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ConnectError::InvalidEndpoint { .. })
    }
}

/// Errors handing a frame to the transport
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The outbound queue is at capacity
    #[error("Outbound queue is full")]
    QueueFull,

    /// The transport is connecting or reconnecting
    #[error("Transport is not connected")]
    NotConnected,

    /// The transport has been closed
    #[error("Transport is closed")]
    Closed,
}

/// Session-level errors reported to the user
#[derive(Error, Debug)]
pub enum SessionError {
    /// Reconnection gave up
    #[error("Connection lost and {attempts} reconnect attempts failed (last error: {last_error})")]
    Unrecoverable { attempts: u32, last_error: String },

    /// The terminal surface failed
    #[error("Terminal surface error: {0}")]
    Surface(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
