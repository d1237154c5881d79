//! Relay configuration: defaults, optional TOML file, environment overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// Fan-out policy for relayed messages.
///
/// `Targeted` delivers only to connections owned by the intended receiver.
/// `Broadcast` reproduces the legacy policy of pushing every message to every
/// connection except the sender's, kept only for compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    Targeted,
    Broadcast,
}

impl Default for DeliveryMode {
    fn default() -> Self {
        Self::Targeted
    }
}

impl std::str::FromStr for DeliveryMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "targeted" => Ok(Self::Targeted),
            "broadcast" => Ok(Self::Broadcast),
            other => anyhow::bail!("unknown delivery mode: {other} (expected targeted|broadcast)"),
        }
    }
}

/// Relay server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Socket address to listen on.
    pub listen: String,
    /// Path to the sqlite database file.
    pub database: PathBuf,
    /// Fan-out policy.
    pub delivery_mode: DeliveryMode,
    /// Keepalive ping interval in seconds.
    pub ping_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:4000".to_string(),
            database: PathBuf::from("aurelay.db"),
            delivery_mode: DeliveryMode::default(),
            ping_interval_secs: 30,
        }
    }
}

impl RelayConfig {
    /// Load configuration, layering (lowest to highest precedence):
    /// built-in defaults, the TOML file, `AURELAY_*` environment variables.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&RelayConfig::default()).context("serializing defaults")?);

        match config_path {
            Some(path) => {
                builder = builder.add_source(
                    File::from(path.to_path_buf())
                        .format(FileFormat::Toml)
                        .required(true),
                );
            }
            None => {
                builder = builder.add_source(
                    File::with_name("aurelay").format(FileFormat::Toml).required(false),
                );
            }
        }

        builder = builder.add_source(Environment::with_prefix("AURELAY"));

        builder
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")
    }
}
