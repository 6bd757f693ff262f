//! tb-host: Remote side of a termbridge session
//!
//! Runs a command on a pseudo-terminal and serves it to session clients
//! over raw TCP or WebSocket, using the termbridge frame protocol.

pub mod pty;
pub mod server;

pub use pty::{PtyEvent, PtyInput, PtyProcess};
pub use server::{Host, LocalTerminal};
