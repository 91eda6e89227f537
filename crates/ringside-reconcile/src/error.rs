//! Error types for `ringside-reconcile`.

use std::time::Duration;

use thiserror::Error;

use crate::gateway::Op;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Record(#[from] ringside_core::Error),

  /// The store rejected or failed a call.
  #[error("store {op} on {target} failed: {source}")]
  Store {
    op:     Op,
    target: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("store {op} on {target} timed out after {after:?}")]
  Timeout {
    op:     Op,
    target: String,
    after:  Duration,
  },

  /// Too many gateway calls failed in a row; the run was stopped.
  #[error("store unavailable after {consecutive_failures} consecutive failed calls")]
  GatewayUnavailable { consecutive_failures: usize },

  #[error("config error: {0}")]
  Config(#[from] config::ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
