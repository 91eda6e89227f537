//! Run-scoped deduplication and per-key serialization.
//!
//! Nothing here outlives a run: a fresh [`Deduplicator`] starts empty.

use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use ringside_core::{EntityKey, EntityKind, FieldMap};
use serde_json::Value;
use tokio::sync::OwnedMutexGuard;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Known state ─────────────────────────────────────────────────────────────

/// What the run knows about a key's stored row.
#[derive(Debug, Clone, PartialEq)]
pub enum Known {
  Absent,
  Present(FieldMap),
}

// ─── Deduplicator ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Deduplicator {
  resolved: Mutex<HashMap<EntityKind, HashSet<EntityKey>>>,
  known:    Mutex<HashMap<EntityKey, Known>>,
}

impl Deduplicator {
  pub fn new() -> Self { Self::default() }

  /// Whether a record of `kind` with `key` was already handled this run.
  pub fn already_resolved(&self, kind: EntityKind, key: &EntityKey) -> bool {
    locked(&self.resolved)
      .get(&kind)
      .is_some_and(|keys| keys.contains(key))
  }

  /// Returns `false` if the key was already resolved.
  pub fn mark_resolved(&self, kind: EntityKind, key: EntityKey) -> bool {
    locked(&self.resolved).entry(kind).or_default().insert(key)
  }

  /// Cached lookup result for `key`, if the run has one.
  pub fn known(&self, key: &EntityKey) -> Option<Known> {
    locked(&self.known).get(key).cloned()
  }

  pub fn remember(&self, key: EntityKey, known: Known) {
    locked(&self.known).insert(key, known);
  }

  pub fn forget(&self, key: &EntityKey) {
    locked(&self.known).remove(key);
  }

  /// Advance the cached row by a write this run issued. Only non-null values
  /// are applied, the same way the store merges them.
  pub fn apply(&self, key: &EntityKey, fields: &FieldMap) {
    let mut known = locked(&self.known);
    let entry = known.entry(key.clone()).or_insert(Known::Absent);
    if matches!(entry, Known::Absent) {
      let row = key
        .columns()
        .into_iter()
        .map(|(column, value)| (column.to_owned(), Value::String(value.to_owned())))
        .collect();
      *entry = Known::Present(row);
    }
    if let Known::Present(row) = entry {
      for (name, value) in fields {
        if !value.is_null() {
          row.insert(name.clone(), value.clone());
        }
      }
    }
  }
}

// ─── Key locks ───────────────────────────────────────────────────────────────

/// One async mutex per entity key, created on first use and dropped once
/// nobody holds or waits on it.
///
/// Callers that need both a bout and a participation lock must take the
/// bout's first and never hold a participation lock while waiting on a bout.
#[derive(Debug, Default)]
pub struct KeyLocks {
  locks: Mutex<HashMap<EntityKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
  pub fn new() -> Self { Self::default() }

  pub async fn lock(&self, key: &EntityKey) -> KeyGuard<'_> {
    let mutex = Arc::clone(locked(&self.locks).entry(key.clone()).or_default());
    KeyGuard {
      locks: self,
      key:   key.clone(),
      guard: Some(mutex.lock_owned().await),
    }
  }
}

/// Holds one key's lock; the last guard out removes the key's entry.
pub struct KeyGuard<'a> {
  locks: &'a KeyLocks,
  key:   EntityKey,
  guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
  fn drop(&mut self) {
    drop(self.guard.take());
    // Waiters and new lockers clone the Arc under this map lock, so a count
    // of one means the map holds the only reference.
    let mut locks = locked(&self.locks.locks);
    if locks.get(&self.key).is_some_and(|mutex| Arc::strong_count(mutex) == 1) {
      locks.remove(&self.key);
    }
  }
}
