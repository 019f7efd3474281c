//! Transport configuration.
//!
//! Every tunable has a production default taken from [`crate::constants`].
//! Values can come from a JSON file, from `GATELINK_*` environment variables,
//! or be set directly (tests shrink all intervals to a few milliseconds).

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::constants;

/// Deployment environment selecting the address-resolution path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Live gateway.
    #[default]
    Production,
    /// Development gateway.
    Sandbox,
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "sandbox" => Ok(Self::Sandbox),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Sandbox => write!(f, "sandbox"),
        }
    }
}

/// Which thread hands inbound frames to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Frames are queued and handed over by `Transport::update` on the
    /// caller's thread. Required by single-threaded game loops.
    #[default]
    MainThread,
    /// Frames are handed to the engine directly from the reader thread.
    Background,
}

impl FromStr for Delivery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "main_thread" | "main-thread" | "main" => Ok(Self::MainThread),
            "background" => Ok(Self::Background),
            other => Err(format!("unknown delivery mode: {other}")),
        }
    }
}

/// Configuration for one transport instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Stage used by `open_and_run`.
    pub stage: Stage,
    /// Inbound delivery mode, fixed at construction.
    pub delivery: Delivery,
    /// Per-attempt connect bound in milliseconds.
    pub connect_timeout_ms: u64,
    /// Close bound in milliseconds.
    pub close_timeout_ms: u64,
    /// Per-payload send bound in milliseconds.
    pub send_timeout_ms: u64,
    /// Drain cycle and wait-state poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Pump thread join bound in milliseconds.
    pub join_timeout_ms: u64,
    /// Backoff base unit in milliseconds.
    pub backoff_base_ms: u64,
    /// Backoff upper bound in milliseconds.
    pub backoff_cap_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            stage: Stage::default(),
            delivery: Delivery::default(),
            connect_timeout_ms: millis(constants::CONNECT_TIMEOUT),
            close_timeout_ms: millis(constants::CLOSE_TIMEOUT),
            send_timeout_ms: millis(constants::SEND_TIMEOUT),
            poll_interval_ms: millis(constants::POLL_INTERVAL),
            join_timeout_ms: millis(constants::JOIN_TIMEOUT),
            backoff_base_ms: millis(constants::BACKOFF_BASE),
            backoff_cap_ms: millis(constants::BACKOFF_CAP),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

impl TransportConfig {
    /// Loads configuration from a JSON file. Missing fields keep defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Applies `GATELINK_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary key lookup.
    ///
    /// Unparsable values are logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("GATELINK_STAGE") {
            match value.parse() {
                Ok(stage) => self.stage = stage,
                Err(e) => log::warn!("Ignoring GATELINK_STAGE: {e}"),
            }
        }

        if let Some(value) = lookup("GATELINK_DELIVERY") {
            match value.parse() {
                Ok(delivery) => self.delivery = delivery,
                Err(e) => log::warn!("Ignoring GATELINK_DELIVERY: {e}"),
            }
        }

        let numeric: [(&str, &mut u64); 5] = [
            ("GATELINK_CONNECT_TIMEOUT_MS", &mut self.connect_timeout_ms),
            ("GATELINK_CLOSE_TIMEOUT_MS", &mut self.close_timeout_ms),
            ("GATELINK_SEND_TIMEOUT_MS", &mut self.send_timeout_ms),
            ("GATELINK_POLL_INTERVAL_MS", &mut self.poll_interval_ms),
            ("GATELINK_JOIN_TIMEOUT_MS", &mut self.join_timeout_ms),
        ];
        for (key, slot) in numeric {
            if let Some(value) = lookup(key) {
                match value.trim().parse::<u64>() {
                    Ok(parsed) => *slot = parsed,
                    Err(e) => log::warn!("Ignoring {key}={value}: {e}"),
                }
            }
        }
    }

    /// Per-attempt connect bound.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Close bound.
    #[must_use]
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Per-payload send bound.
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Drain cycle and wait-state poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Pump thread join bound.
    #[must_use]
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Reconnect backoff built from the configured base and cap.
    #[must_use]
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_cap_ms),
        )
    }
}
