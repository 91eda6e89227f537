//! Error types for `ringside-core`.

use thiserror::Error;

use crate::entity::EntityKind;

#[derive(Debug, Error)]
pub enum Error {
  /// The identity key could not be derived; the record is unusable.
  #[error("malformed {kind} record: missing identity field `{field}`")]
  MissingKey {
    kind:  EntityKind,
    field: &'static str,
  },

  #[error("{0} record did not serialise to a JSON object")]
  NotAnObject(EntityKind),

  #[error("invalid win-loss-draw record: {0:?}")]
  InvalidFightRecord(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
