//! PTY host configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use tb_protocol::{TerminalSize, DEFAULT_MAX_FRAME_SIZE};

use super::bridge::validate_frame_size;
use crate::endpoint::Endpoint;
use crate::error::ConfigError;

/// Configuration for the process host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Address to listen on, e.g. `ws://0.0.0.0:8080/ws`
    pub listen: Option<Endpoint>,

    /// Program and arguments to run (empty = `$SHELL`)
    pub command: Vec<String>,

    /// Extra environment variables for the process
    pub env: Vec<(String, String)>,

    /// Largest frame payload we send or accept
    pub max_frame_size: usize,

    /// Append all process output to this file
    pub record: Option<PathBuf>,

    /// PTY size used until the first client reports its own
    pub initial_size: TerminalSize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen: None,
            command: vec![],
            env: vec![("TERM".to_string(), "xterm-256color".to_string())],
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            record: None,
            initial_size: TerminalSize::DEFAULT,
        }
    }
}

impl HostConfig {
    /// The listen address, or an error if none is configured
    pub fn require_listen(&self) -> Result<&Endpoint, ConfigError> {
        self.listen.as_ref().ok_or_else(|| {
            ConfigError::Invalid("no listen address configured (set host.listen or pass one)".into())
        })
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_frame_size(self.max_frame_size)?;
        if self.command.first().is_some_and(|program| program.is_empty()) {
            return Err(ConfigError::Invalid("command program must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = HostConfig::default();
        config.validate().unwrap();
        assert!(config.require_listen().is_err());
        assert!(config
            .env
            .iter()
            .any(|(k, v)| k == "TERM" && v == "xterm-256color"));
    }

    #[test]
    fn test_rejects_zero_initial_size() {
        let result = toml::from_str::<HostConfig>("[initial_size]\ncols = 0\nrows = 24\n");
        assert!(result.is_err());

        let config: HostConfig = toml::from_str("[initial_size]\ncols = 100\nrows = 30\n").unwrap();
        assert_eq!(config.initial_size, TerminalSize::new(100, 30).unwrap());
    }
}
