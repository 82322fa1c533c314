//! Layered configuration (§6): defaults, then an optional TOML file, then
//! `SEQ__`-prefixed environment variables (double underscore nests), in
//! that order of increasing precedence.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config as RawConfig, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage_root: PathBuf,
    pub origin: String,
    #[serde(with = "humantime_serde")]
    pub checkpoint_interval: Duration,
    pub batch_max_size: usize,
    #[serde(with = "humantime_serde")]
    pub batch_max_age: Duration,
    pub pushback_threshold: u64,
    #[serde(with = "humantime_serde")]
    pub follower_poll_interval: Duration,
    pub signer_key_path: PathBuf,
    #[serde(default)]
    pub additional_signer_key_paths: Vec<PathBuf>,
    pub listen_addr: SocketAddr,
}

impl Config {
    /// Loads configuration from defaults, an optional TOML file, then the
    /// environment, and validates the result.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = RawConfig::builder()
            .set_default("checkpoint_interval", "10s")
            .and_then(|b| b.set_default("batch_max_size", 256_i64))
            .and_then(|b| b.set_default("batch_max_age", "1s"))
            .and_then(|b| b.set_default("pushback_threshold", 10_000_i64))
            .and_then(|b| b.set_default("follower_poll_interval", "500ms"))
            .and_then(|b| b.set_default("listen_addr", "0.0.0.0:7700"))
            .and_then(|b| b.set_default("additional_signer_key_paths", Vec::<String>::new()))
            .map_err(|e| Error::Fatal(format!("setting configuration defaults: {e}")))?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder = builder.add_source(Environment::with_prefix("SEQ").separator("__"));

        let raw = builder
            .build()
            .map_err(|e| Error::Fatal(format!("loading configuration: {e}")))?;
        let config: Self = raw
            .try_deserialize()
            .map_err(|e| Error::Fatal(format!("parsing configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.checkpoint_interval < Duration::from_secs(1) {
            return Err(Error::Fatal("checkpoint_interval must be at least 1 second".into()));
        }
        if self.batch_max_size == 0 {
            return Err(Error::Fatal("batch_max_size must be greater than 0".into()));
        }
        if self.batch_max_age.is_zero() {
            return Err(Error::Fatal("batch_max_age must be greater than 0".into()));
        }
        Ok(())
    }
}
