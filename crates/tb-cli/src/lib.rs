//! termbridge: Command-line interface
//!
//! Provides the `termbridge` binary: attach the local terminal to a remote
//! process (`connect`), host a process for others to attach to (`serve`),
//! and manage the configuration file (`config`).

pub mod commands;
pub mod output;
pub mod surface;
