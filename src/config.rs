use std::path::PathBuf;

use chrono::{FixedOffset, Offset, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Runtime settings, read from `ESP_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Prometheus exporter port; disabled when unset.
    pub metrics_port: Option<u16>,
    /// WAL appends after which the background compactor rewrites the log.
    pub compact_threshold: u64,
    /// Offset used to turn stored UTC instants into calendar days.
    pub utc_offset: FixedOffset,
    pub mail_from: String,
    pub outbox_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            utc_offset: Utc.fix(),
            mail_from: "noreply@esp.sn".into(),
            outbox_capacity: 1024,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source. Unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(dir) = lookup("ESP_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(port) = lookup("ESP_METRICS_PORT") {
            config.metrics_port = Some(parse("ESP_METRICS_PORT", port)?);
        }
        if let Some(n) = lookup("ESP_COMPACT_THRESHOLD") {
            config.compact_threshold = parse("ESP_COMPACT_THRESHOLD", n)?;
        }
        if let Some(minutes) = lookup("ESP_UTC_OFFSET_MINUTES") {
            let parsed: i32 = parse("ESP_UTC_OFFSET_MINUTES", minutes.clone())?;
            config.utc_offset = parsed
                .checked_mul(60)
                .and_then(FixedOffset::east_opt)
                .ok_or(ConfigError::Invalid {
                    key: "ESP_UTC_OFFSET_MINUTES",
                    value: minutes,
                })?;
        }
        if let Some(from) = lookup("ESP_MAIL_FROM") {
            config.mail_from = from;
        }
        if let Some(n) = lookup("ESP_OUTBOX_CAPACITY") {
            let capacity: usize = parse("ESP_OUTBOX_CAPACITY", n.clone())?;
            if capacity == 0 {
                return Err(ConfigError::Invalid {
                    key: "ESP_OUTBOX_CAPACITY",
                    value: n,
                });
            }
            config.outbox_capacity = capacity;
        }
        Ok(config)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}
