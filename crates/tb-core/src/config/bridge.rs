//! Session client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use tb_protocol::{DEFAULT_MAX_FRAME_SIZE, MAX_FRAME_SIZE_LIMIT, MIN_FRAME_SIZE_LIMIT};

use super::serde_utils::duration_millis;
use crate::endpoint::Endpoint;
use crate::error::ConfigError;

/// Longest debounce window accepted for resize events
pub const MAX_RESIZE_DEBOUNCE: Duration = Duration::from_secs(5);

/// Configuration for a terminal session client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Remote endpoint, e.g. `ws://devbox:8080/ws`. Required before connecting.
    pub endpoint: Option<Endpoint>,

    /// Largest frame payload we send or accept
    pub max_frame_size: usize,

    /// Capacity of the outbound frame queue
    pub send_queue_capacity: usize,

    /// Timeout for a single connection attempt
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,

    /// Interval between keepalive pings (0 disables them)
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,

    /// Silence after which the connection is considered lost (0 disables)
    #[serde(with = "duration_millis")]
    pub heartbeat_timeout: Duration,

    /// Reconnection policy
    pub backoff: BackoffConfig,

    /// Resize coalescing
    pub resize: ResizeConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            send_queue_capacity: 256,
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(45),
            backoff: BackoffConfig::default(),
            resize: ResizeConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Create a configuration for the given endpoint with default settings
    pub fn for_endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint: Some(endpoint),
            ..Self::default()
        }
    }

    /// The endpoint, or an error if none is configured
    pub fn require_endpoint(&self) -> Result<&Endpoint, ConfigError> {
        self.endpoint.as_ref().ok_or_else(|| {
            ConfigError::Invalid("no endpoint configured (set bridge.endpoint or pass one)".into())
        })
    }

    /// Heartbeat interval, if enabled
    pub fn heartbeat(&self) -> Option<Duration> {
        (!self.heartbeat_interval.is_zero()).then_some(self.heartbeat_interval)
    }

    /// Heartbeat timeout, if enabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        (!self.heartbeat_timeout.is_zero()).then_some(self.heartbeat_timeout)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_frame_size(self.max_frame_size)?;
        if self.send_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "send_queue_capacity must be at least 1".into(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid("connect_timeout must be non-zero".into()));
        }
        if let (Some(interval), Some(timeout)) = (self.heartbeat(), self.idle_timeout()) {
            if timeout <= interval {
                return Err(ConfigError::Invalid(format!(
                    "heartbeat_timeout ({:?}) must exceed heartbeat_interval ({:?})",
                    timeout, interval
                )));
            }
        }
        self.backoff.validate()?;
        self.resize.validate()
    }
}

/// Check a maximum frame size against the protocol limits
pub fn validate_frame_size(size: usize) -> Result<(), ConfigError> {
    if !(MIN_FRAME_SIZE_LIMIT..=MAX_FRAME_SIZE_LIMIT).contains(&size) {
        return Err(ConfigError::Invalid(format!(
            "max_frame_size {} is outside {}..={}",
            size, MIN_FRAME_SIZE_LIMIT, MAX_FRAME_SIZE_LIMIT
        )));
    }
    Ok(())
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay ceiling for the first retry
    #[serde(with = "duration_millis")]
    pub base: Duration,

    /// Upper bound on any delay
    #[serde(with = "duration_millis")]
    pub cap: Duration,

    /// Growth factor applied per retry
    pub multiplier: f64,

    /// Fraction of each delay that is randomized (1.0 = full jitter)
    pub jitter: f64,

    /// Retries after a lost or failed connection before giving up
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            cap: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 1.0,
            max_attempts: 5,
        }
    }
}

impl BackoffConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base.is_zero() || self.base > self.cap {
            return Err(ConfigError::Invalid(format!(
                "backoff base ({:?}) must be non-zero and not exceed cap ({:?})",
                self.base, self.cap
            )));
        }
        if !(self.multiplier >= 1.0 && self.multiplier.is_finite()) {
            return Err(ConfigError::Invalid(
                "backoff multiplier must be a finite number >= 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid("backoff jitter must be within 0.0..=1.0".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("backoff max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Resize coalescing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeConfig {
    /// Quiet period before a size change is sent
    #[serde(with = "duration_millis")]
    pub debounce: Duration,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
        }
    }
}

impl ResizeConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce > MAX_RESIZE_DEBOUNCE {
            return Err(ConfigError::Invalid(format!(
                "resize debounce {:?} exceeds {:?}",
                self.debounce, MAX_RESIZE_DEBOUNCE
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.backoff.base, Duration::from_millis(250));
        assert_eq!(config.backoff.cap, Duration::from_secs(10));
        assert_eq!(config.backoff.max_attempts, 5);
        assert_eq!(config.resize.debounce, Duration::from_millis(100));
        assert!(config.endpoint.is_none());
        assert!(config.require_endpoint().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let mut config = BridgeConfig::default();
        config.max_frame_size = 4;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.send_queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.backoff.base = Duration::from_secs(20);
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.backoff.jitter = 1.5;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.resize.debounce = Duration::from_secs(6);
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.heartbeat_timeout = Duration::from_secs(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbeat_can_be_disabled() {
        let mut config = BridgeConfig::default();
        config.heartbeat_interval = Duration::ZERO;
        config.heartbeat_timeout = Duration::ZERO;
        config.validate().unwrap();
        assert_eq!(config.heartbeat(), None);
        assert_eq!(config.idle_timeout(), None);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: BridgeConfig = toml::from_str(
            r#"
            endpoint = "ws://devbox:8080/ws"

            [backoff]
            max_attempts = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.endpoint.unwrap().to_string(), "ws://devbox:8080/ws");
        assert_eq!(config.backoff.max_attempts, 8);
        assert_eq!(config.backoff.base, Duration::from_millis(250));
        assert_eq!(config.send_queue_capacity, 256);
    }
}
