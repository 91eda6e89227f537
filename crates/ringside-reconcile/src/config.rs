//! Runtime configuration, deserialised from `ringside.toml` and `RINGSIDE_*`
//! environment variables.

use std::{path::PathBuf, time::Duration};

use config::{Config, ConfigBuilder, Environment, builder::DefaultState};
use serde::Deserialize;

use crate::Result;

/// When decided writes reach the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
  /// Each insert or update is issued as soon as it is decided.
  #[default]
  Immediate,
  /// Writes are staged and issued per kind on flush.
  Batched,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
  pub store_path:                       PathBuf,
  pub write_mode:                       WriteMode,
  pub call_timeout_ms:                  u64,
  pub flush_interval_secs:              Option<u64>,
  pub channel_capacity:                 usize,
  /// Fields the comparator never looks at.
  pub ignore_fields:                    Vec<String>,
  /// Zero disables the check.
  pub abort_after_consecutive_failures: usize,
}

impl Default for ReconcileConfig {
  fn default() -> Self {
    Self {
      store_path:                       PathBuf::from("ringside.db"),
      write_mode:                       WriteMode::Immediate,
      call_timeout_ms:                  10_000,
      flush_interval_secs:              None,
      channel_capacity:                 1024,
      ignore_fields:                    vec![
        "created_at".to_owned(),
        "updated_at".to_owned(),
      ],
      abort_after_consecutive_failures: 25,
    }
  }
}

impl ReconcileConfig {
  /// Load from an optional TOML file layered under `RINGSIDE_*` variables.
  pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
    Self::from_builder(
      Config::builder()
        .add_source(config::File::from(path.into()).required(false)),
    )
  }

  fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
    let settings = builder
      .add_source(Environment::with_prefix("RINGSIDE").try_parsing(true))
      .build()?;
    Ok(settings.try_deserialize()?)
  }

  pub fn call_timeout(&self) -> Duration {
    Duration::from_millis(self.call_timeout_ms)
  }

  pub fn flush_interval(&self) -> Option<Duration> {
    self
      .flush_interval_secs
      .filter(|secs| *secs > 0)
      .map(Duration::from_secs)
  }
}
