//! Configuration loading and validation

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use gossip_core::DEFAULT_BUF_SIZE;
use serde::{Deserialize, Serialize};

/// Main configuration for a gossip node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Round count and length
    pub epochs: EpochsConfig,

    /// Per-role error budget and pacing
    pub threads: ThreadsConfig,

    /// Ports, buffer and socket timeout
    pub network: NetworkConfig,

    /// Where inputs live and outputs go
    pub paths: PathsConfig,

    /// Output path components for this run
    pub experiment: ExperimentConfig,

    /// Log file formatting
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochsConfig {
    /// Number of rounds to run
    pub max: u64,
    /// Round length in seconds
    pub duration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadsConfig {
    /// Non-timeout errors a role tolerates before stopping the run
    pub max_error: u32,

    /// Pause after a failed exchange, in seconds (default: 0.5)
    #[serde(default = "default_backoff")]
    pub backoff: f64,

    /// How long shutdown waits for roles to wind down, in seconds (default: 5)
    #[serde(default = "default_drain")]
    pub drain: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Port the passive role listens on and the active role dials
    pub recv_port: u16,

    /// Source port for outbound exchanges (0 = ephemeral)
    #[serde(default)]
    pub send_port: u16,

    /// Receive buffer size; one read must hold one whole message
    #[serde(default = "default_buf_size")]
    pub buf_size: usize,

    /// Socket timeout in seconds, applied to connect/accept/send/recv
    pub timeout: f64,

    /// Listen backlog for the passive role (default: 128)
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Interface whose IPv4 address the node binds (or an IP literal)
    pub node_interface: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Existing directory under which experiment output is written
    pub root_folder: PathBuf,
    /// File with one `<id>,<address>` line per neighbour
    pub list_of_neighbours_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub aggregation: String,
    pub graph: String,
    pub run: String,
}

impl ExperimentConfig {
    /// `<aggregation>/<graph>/<run>`, relative to the root folder.
    pub fn relative_dir(&self) -> PathBuf {
        Path::new(&self.aggregation).join(&self.graph).join(&self.run)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Line format for the log file
    #[serde(default)]
    pub format: LogFormat,

    /// Default filter directive when RUST_LOG is unset (default: "debug")
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_level(),
        }
    }
}

fn default_backoff() -> f64 {
    0.5
}

fn default_drain() -> f64 {
    5.0
}

fn default_buf_size() -> usize {
    DEFAULT_BUF_SIZE
}

fn default_backlog() -> u32 {
    128
}

fn default_level() -> String {
    "debug".to_string()
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("epochs.max must be at least 1")]
    NoEpochs,
    #[error("{0} must be a positive number of seconds")]
    NotPositive(&'static str),
    #[error("{0} must not be negative")]
    Negative(&'static str),
    #[error("{0} is too long to schedule")]
    TooLong(&'static str),
    #[error("network.buf_size must be at least 1")]
    EmptyBuffer,
    #[error("threads.max_error must be at least 1")]
    NoErrorBudget,
}

impl Config {
    /// Load and validate configuration from a JSON file
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
        let config = Self::from_json(&content)
            .with_context(|| format!("Invalid config file: {:?}", config_path))?;
        tracing::debug!("Loaded configuration from {:?}", config_path);
        Ok(config)
    }

    /// Parse and validate configuration from JSON text
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.epochs.max == 0 {
            return Err(ConfigError::NoEpochs);
        }
        positive_seconds("epochs.duration", self.epochs.duration)?;
        // The last epoch boundary is the longest wait the clock schedules
        schedulable(
            "epochs.max * epochs.duration",
            self.epochs.duration * (self.epochs.max as f64 + 1.0),
        )?;
        positive_seconds("network.timeout", self.network.timeout)?;
        non_negative_seconds("threads.backoff", self.threads.backoff)?;
        non_negative_seconds("threads.drain", self.threads.drain)?;
        if self.network.buf_size == 0 {
            return Err(ConfigError::EmptyBuffer);
        }
        if self.threads.max_error == 0 {
            return Err(ConfigError::NoErrorBudget);
        }
        Ok(())
    }

    pub fn epoch_duration(&self) -> Duration {
        Duration::from_secs_f64(self.epochs.duration)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.network.timeout)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs_f64(self.threads.backoff)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_secs_f64(self.threads.drain)
    }
}

fn positive_seconds(name: &'static str, v: f64) -> Result<(), ConfigError> {
    if !(v.is_finite() && v > 0.0) {
        return Err(ConfigError::NotPositive(name));
    }
    schedulable(name, v)
}

fn non_negative_seconds(name: &'static str, v: f64) -> Result<(), ConfigError> {
    if !(v.is_finite() && v >= 0.0) {
        return Err(ConfigError::Negative(name));
    }
    schedulable(name, v)
}

fn schedulable(name: &'static str, v: f64) -> Result<(), ConfigError> {
    Duration::try_from_secs_f64(v)
        .map(|_| ())
        .map_err(|_| ConfigError::TooLong(name))
}
