//! Error type for `ringside-store-sqlite`.

use ringside_core::{EntityKey, EntityKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// Attempted to update a row that does not exist.
  #[error("row not found: {0}")]
  NotFound(EntityKey),

  #[error("batch for {expected} contains a row keyed {found}")]
  KindMismatch {
    expected: EntityKind,
    found:    EntityKey,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
