//! The `RecordStore` trait, the remote store gateway.
//!
//! The reconciler reads and writes persisted entities only through this
//! trait. Backends (e.g. `ringside-store-sqlite`) own transport, schema, and
//! row-level contention; retry policy, if any, is theirs as well.

use std::{collections::HashMap, future::Future};

use crate::entity::{EntityKey, EntityKind, FieldMap};

// ─── Row ─────────────────────────────────────────────────────────────────────

/// A write payload: identity plus the fields to set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
  pub key:    EntityKey,
  pub fields: FieldMap,
}

impl Row {
  pub fn kind(&self) -> EntityKind { self.key.kind() }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the persisted entity store.
///
/// Stored rows are returned as a [`FieldMap`] that includes the identity
/// columns and any store-managed metadata (`created_at`, `updated_at`).
/// Writes merge: no method ever deletes a field.
///
/// All methods return `Send` futures so a store can be shared between tokio
/// tasks.
pub trait RecordStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Fetch one stored row. Returns `None` if it does not exist.
  fn get_by_key(
    &self,
    key: EntityKey,
  ) -> impl Future<Output = Result<Option<FieldMap>, Self::Error>> + Send + '_;

  /// Fetch every existing row among `keys`. Keys that do not exist are
  /// simply absent from the result.
  fn get_many_by_keys(
    &self,
    kind: EntityKind,
    keys: Vec<EntityKey>,
  ) -> impl Future<Output = Result<HashMap<EntityKey, FieldMap>, Self::Error>>
  + Send
  + '_;

  /// Insert a new row. Fails if the key already exists or a referenced
  /// parent is missing.
  fn insert(
    &self,
    row: Row,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Set `fields` on an existing row, leaving every other field untouched.
  fn update(
    &self,
    key: EntityKey,
    fields: FieldMap,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Insert-or-merge every row of one kind as a single unit of work.
  fn batch_upsert(
    &self,
    kind: EntityKind,
    rows: Vec<Row>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
