//! Runtime configuration.
//!
//! Defaults are usable as-is; a TOML file may override any subset of keys and
//! the CLI layers its flags on top of that.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tether_common::error::{Result, TetherError};
use tracing::debug;

use crate::retry::{Backoff, RetryPolicy};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub server: ServerConfig,
    pub transport: TransportConfig,
    pub resize: ResizeConfig,
    pub guard: GuardConfig,
    pub scroll: ScrollConfig,
    pub continuity: ContinuityConfig,
}

impl TetherConfig {
    /// Load from a TOML file; missing keys fall back to defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| TetherError::Config(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the session REST API
    pub api_url: String,
    /// URL of the duplex channel endpoint
    pub channel_url: String,
    /// Upper bound on one session create call
    pub acquire_timeout_ms: u64,
    /// Create attempts before falling back to a simulated session
    pub acquire_attempts: u32,
}

impl ServerConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn acquire_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.acquire_attempts,
            Backoff::new(Duration::from_millis(100), Duration::from_millis(800)),
        )
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:3000/api/terminal".to_string(),
            channel_url: "ws://127.0.0.1:3000/terminal".to_string(),
            acquire_timeout_ms: 5_000,
            acquire_attempts: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of each delay added as random jitter (0.0 disables)
    pub jitter: f64,
    pub max_attempts: u32,
    /// How long to wait for the join acknowledgement
    pub join_timeout_ms: u64,
}

impl TransportConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Backoff::new(
                Duration::from_millis(self.base_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            )
            .with_jitter(self.jitter),
        )
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: 0.2,
            max_attempts: 5,
            join_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeConfig {
    pub debounce_ms: u64,
    /// Delay between the fit and the restoration check
    pub settle_ms: u64,
    /// Readiness checks per cycle before the cycle is skipped
    pub readiness_attempts: u32,
    pub readiness_base_delay_ms: u64,
    pub readiness_max_delay_ms: u64,
}

impl ResizeConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn readiness_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.readiness_attempts,
            Backoff::new(
                Duration::from_millis(self.readiness_base_delay_ms),
                Duration::from_millis(self.readiness_max_delay_ms),
            ),
        )
    }
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 150,
            settle_ms: 100,
            readiness_attempts: 5,
            readiness_base_delay_ms: 50,
            readiness_max_delay_ms: 800,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub initial_poll_ms: u64,
    pub max_poll_ms: u64,
    /// Default budget for `wait_until_ready`
    pub timeout_ms: u64,
}

impl GuardConfig {
    pub fn poll_backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.initial_poll_ms),
            Duration::from_millis(self.max_poll_ms),
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            initial_poll_ms: 10,
            max_poll_ms: 200,
            timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    pub poll_ms: u64,
    pub debounce_ms: u64,
}

impl ScrollConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            poll_ms: 100,
            debounce_ms: 150,
        }
    }
}

/// Heuristics deciding when a resize lost visible content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuityConfig {
    pub max_line_delta: usize,
    pub max_viewport_delta: usize,
    pub min_lines: usize,
    /// Extra lines captured above the visible region
    pub margin: usize,
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self {
            max_line_delta: 3,
            max_viewport_delta: 10,
            min_lines: 5,
            margin: 5,
        }
    }
}
