// src/config/model.rs

use log::LevelFilter;
use serde::Deserialize;
use shared::constants::MAX_TRANSFER_SIZE;
use std::{net::SocketAddr, str::FromStr, time::Duration};
use thiserror::Error;

use crate::pipeline::SuspendPolicy;

/// Top-level runtime config
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub logging:      LoggingConfig,
    pub pipeline:     PipelineConfig,
    pub capabilities: HostCapabilities,
    pub metrics:      MetricsConfig,
    pub emulator:     EmulatorConfig,
}

/// Mirror of the whole file; every table may be absent
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub logging:      LoggingConfig,
    pub pipeline:     RawPipeline,
    pub capabilities: HostCapabilities,
    pub metrics:      RawMetrics,
    pub emulator:     RawEmulator,
}

/// Mirror of the `[logging]` table
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]            pub enable: bool,
    #[serde(default)]            pub file:   Option<String>,
    #[serde(default = "default_level")] pub level: String,
}
fn default_level() -> String { "INFO".into() }

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { enable: false, file: None, level: default_level() }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        LevelFilter::from_str(&self.level).map_err(|_| ConfigError::InvalidLevel(self.level.clone()))
    }
}

/// Raw `[pipeline]` table; durations are humantime strings
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawPipeline {
    pub max_transfer_size:     Option<usize>,
    pub mission_timeout:       Option<String>,
    pub cancel_grace:          Option<String>,
    pub suspend_policy:        Option<String>,
    pub suspend_drain_timeout: Option<String>,
}

/// Fully-typed pipeline limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Largest payload accepted and largest bulk-in read issued.
    pub max_transfer_size:     usize,
    /// How long a written mission may wait for its ready notification.
    pub mission_timeout:       Option<Duration>,
    pub cancel_grace:          Duration,
    pub suspend_policy:        SuspendPolicy,
    pub suspend_drain_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            max_transfer_size:     MAX_TRANSFER_SIZE,
            mission_timeout:       None,
            cancel_grace:          Duration::from_secs(2),
            suspend_policy:        SuspendPolicy::Drain,
            suspend_drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Host features probed once at startup, mirror of `[capabilities]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct HostCapabilities {
    /// The host can attach property data to device interfaces.
    #[serde(default)]
    pub interface_property_data: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawMetrics {
    pub listen: Option<String>,
}

/// Prometheus exporter; disabled when `listen` is absent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsConfig {
    pub listen: Option<SocketAddr>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawEmulator {
    pub response_delay: Option<String>,
    pub pending_pulses: Option<u32>,
}

/// Software UDEFX2 used by the host binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorConfig {
    pub response_delay: Duration,
    /// `0x11` pulses sent before each ready.
    pub pending_pulses: u32,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        EmulatorConfig { response_delay: Duration::from_millis(50), pending_pulses: 1 }
    }
}

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid suspend policy '{0}' (expected \"drain\" or \"cancel\")")]
    InvalidSuspendPolicy(String),

    #[error("invalid log level '{0}'")]
    InvalidLevel(String),

    #[error("invalid metrics listen address '{0}': {1}")]
    InvalidListen(String, #[source] std::net::AddrParseError),

    #[error("max_transfer_size must be between 1 and {max}, got {got}")]
    InvalidTransferSize { got: usize, max: usize },

    #[error("invalid duration '{0}': {1}")]
    InvalidDuration(String, #[source] humantime::DurationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

fn duration(raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw).map_err(|e| ConfigError::InvalidDuration(raw.into(), e))
}

impl TryFrom<RawPipeline> for PipelineConfig {
    type Error = ConfigError;

    fn try_from(raw: RawPipeline) -> Result<Self, Self::Error> {
        let d = PipelineConfig::default();
        let max_transfer_size = match raw.max_transfer_size {
            Some(got @ 1..=MAX_TRANSFER_SIZE) => got,
            Some(got) => return Err(ConfigError::InvalidTransferSize { got, max: MAX_TRANSFER_SIZE }),
            None => d.max_transfer_size,
        };
        Ok(PipelineConfig {
            max_transfer_size,
            mission_timeout:       raw.mission_timeout.as_deref().map(duration).transpose()?,
            cancel_grace:          raw.cancel_grace.as_deref().map(duration).transpose()?.unwrap_or(d.cancel_grace),
            suspend_policy:        raw.suspend_policy.as_deref().map(str::parse::<SuspendPolicy>).transpose()?.unwrap_or(d.suspend_policy),
            suspend_drain_timeout: raw
                .suspend_drain_timeout
                .as_deref()
                .map(duration)
                .transpose()?
                .unwrap_or(d.suspend_drain_timeout),
        })
    }
}

impl TryFrom<RawMetrics> for MetricsConfig {
    type Error = ConfigError;

    fn try_from(raw: RawMetrics) -> Result<Self, Self::Error> {
        let listen = raw
            .listen
            .map(|s| s.parse().map_err(|e| ConfigError::InvalidListen(s.clone(), e)))
            .transpose()?;
        Ok(MetricsConfig { listen })
    }
}

impl TryFrom<RawEmulator> for EmulatorConfig {
    type Error = ConfigError;

    fn try_from(raw: RawEmulator) -> Result<Self, Self::Error> {
        let d = EmulatorConfig::default();
        Ok(EmulatorConfig {
            response_delay: raw.response_delay.as_deref().map(duration).transpose()?.unwrap_or(d.response_delay),
            pending_pulses: raw.pending_pulses.unwrap_or(d.pending_pulses),
        })
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        raw.logging.level_filter()?;
        Ok(Config {
            logging:      raw.logging,
            pipeline:     raw.pipeline.try_into()?,
            capabilities: raw.capabilities,
            metrics:      raw.metrics.try_into()?,
            emulator:     raw.emulator.try_into()?,
        })
    }
}
