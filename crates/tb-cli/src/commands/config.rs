//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use tb_core::config::{self, ConfigFile};

fn resolve(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path)
}

/// Load settings for a command.
///
/// An explicitly given file must exist; the default file is optional.
pub fn load_settings(config_path: Option<&Path>) -> Result<ConfigFile> {
    match config_path {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path)),
        None => {
            let path = config::default_config_path();
            config::load_or_default(&path)
                .with_context(|| format!("Failed to load config from {:?}", path))
        }
    }
}

/// Print the config file location
pub fn config_path(config_path: Option<&Path>) {
    println!("{}", resolve(config_path).display());
}

/// Show current configuration
pub fn config_show(config_path: Option<&Path>) -> Result<()> {
    let path = resolve(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'termbridge config init' to create one");
        return Ok(());
    }

    // Parse first so a broken file is reported rather than echoed
    let settings: ConfigFile = config::load_config(&path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;
    settings.bridge.validate()?;
    settings.host.validate()?;

    print_info(&format!("Configuration file: {:?}", path));
    println!();
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    println!("{}", content);

    Ok(())
}

/// Write a commented default configuration
pub fn config_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = resolve(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory: {:?}", dir))?;
    }
    std::fs::write(&path, default_config_template())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    print_success(&format!("Created configuration file: {:?}", path));
    Ok(())
}

/// Default configuration file content
pub fn default_config_template() -> &'static str {
    r#"# termbridge configuration
# Durations are in milliseconds.

[bridge]
# Remote endpoint: tcp://host:port, host:port or ws://host:port/path
# endpoint = "ws://devbox:8080/ws"

# Largest frame payload sent or accepted, in bytes
max_frame_size = 65536

# Outbound frames queued before input is dropped
send_queue_capacity = 256

connect_timeout = 10000

# Keepalive ping interval and the silence after which the link is
# considered dead (0 disables either)
heartbeat_interval = 15000
heartbeat_timeout = 45000

[bridge.backoff]
base = 250
cap = 10000
multiplier = 2.0
# 1.0 = full jitter, 0.0 = fixed delays
jitter = 1.0
max_attempts = 5

[bridge.resize]
debounce = 100

[host]
# Address to listen on
# listen = "ws://0.0.0.0:8080/ws"

# Command to run; empty runs $SHELL
command = []

# Append all process output to this file
# record = "/tmp/termbridge.log"

max_frame_size = 65536
env = [["TERM", "xterm-256color"]]

[host.initial_size]
cols = 80
rows = 24
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_template_matches_defaults() {
        let parsed: ConfigFile = toml::from_str(default_config_template()).unwrap();
        let defaults = ConfigFile::default();

        parsed.bridge.validate().unwrap();
        parsed.host.validate().unwrap();
        assert_eq!(parsed.bridge.max_frame_size, defaults.bridge.max_frame_size);
        assert_eq!(parsed.bridge.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(parsed.bridge.backoff.base, defaults.bridge.backoff.base);
        assert_eq!(parsed.bridge.backoff.max_attempts, 5);
        assert_eq!(parsed.bridge.resize.debounce, defaults.bridge.resize.debounce);
        assert_eq!(parsed.host.env, defaults.host.env);
        assert_eq!(parsed.host.initial_size, defaults.host.initial_size);
        assert!(parsed.bridge.endpoint.is_none());
    }

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        config_init(Some(&path), false).unwrap();
        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.bridge.send_queue_capacity, 256);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_settings(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
