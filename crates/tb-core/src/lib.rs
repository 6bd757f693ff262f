//! tb-core: Core types and configuration for termbridge
//!
//! This crate provides the configuration structures, endpoint parsing and
//! error taxonomy shared by the session client, the PTY host and the CLI.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod types;

pub use endpoint::{Endpoint, Scheme};
pub use error::{ConfigError, ConnectError, SendError, SessionError};
pub use types::{SessionId, SessionState, TransportState};
