//! Staged writes for batched mode.
//!
//! Decided writes are collected per kind and per key, then issued as one
//! `batch_upsert` per kind in [`EntityKind::FLUSH_ORDER`], so a batch never
//! references a row that a later batch would create.

use std::{
  collections::{BTreeMap, HashMap, HashSet},
  sync::{Mutex, MutexGuard, PoisonError},
};

use ringside_core::{EntityKey, EntityKind, FieldMap, store::{RecordStore, Row}};

use crate::{gateway::Gateway, summary::Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Write {
  Insert,
  Update,
}

#[derive(Debug)]
struct Staged {
  write:  Write,
  fields: FieldMap,
}

type Staging = HashMap<EntityKind, BTreeMap<EntityKey, Staged>>;

/// Per-row results of one flush.
#[derive(Debug, Default)]
pub struct FlushReport {
  pub outcomes: Vec<(EntityKey, Outcome)>,
}

impl FlushReport {
  pub fn rows(&self) -> usize { self.outcomes.len() }

  pub fn failed(&self) -> usize {
    self
      .outcomes
      .iter()
      .filter(|(_, outcome)| *outcome == Outcome::Failed)
      .count()
  }
}

#[derive(Debug, Default)]
pub struct BatchFlusher {
  staged:       Mutex<Staging>,
  /// Bouts whose last batch failed; participations under them are not sent
  /// until a later batch writes the bout.
  failed_bouts: Mutex<HashSet<EntityKey>>,
  /// Flushes run one at a time.
  flushing:     tokio::sync::Mutex<()>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BatchFlusher {
  pub fn new() -> Self { Self::default() }

  pub fn stage_insert(&self, row: Row) {
    let kind = row.kind();
    let mut staged = locked(&self.staged);
    let rows = staged.entry(kind).or_default();
    match rows.get_mut(&row.key) {
      Some(existing) => merge(&mut existing.fields, row.fields),
      None => {
        rows.insert(row.key, Staged { write: Write::Insert, fields: row.fields });
      }
    }
  }

  /// Collapses into an already staged write for the same key.
  pub fn stage_update(&self, key: EntityKey, fields: FieldMap) {
    let mut staged = locked(&self.staged);
    let rows = staged.entry(key.kind()).or_default();
    match rows.get_mut(&key) {
      Some(existing) => merge(&mut existing.fields, fields),
      None => {
        rows.insert(key, Staged { write: Write::Update, fields });
      }
    }
  }

  pub fn staged_len(&self) -> usize {
    locked(&self.staged).values().map(BTreeMap::len).sum()
  }

  /// Issue everything staged so far. Rows staged while the flush runs wait
  /// for the next one.
  pub async fn flush<S: RecordStore>(&self, gateway: &Gateway<S>) -> FlushReport {
    let _flushing = self.flushing.lock().await;
    let mut staged = std::mem::take(&mut *locked(&self.staged));
    let mut report = FlushReport::default();

    for kind in EntityKind::FLUSH_ORDER {
      let Some(rows) = staged.remove(&kind) else {
        continue;
      };

      let mut batch = Vec::with_capacity(rows.len());
      let mut sent = Vec::with_capacity(rows.len());
      for (key, entry) in rows {
        if self.parent_failed(&key) {
          tracing::warn!(%key, "not writing participation: its bout batch failed");
          report.outcomes.push((key, Outcome::Failed));
          continue;
        }
        sent.push((key.clone(), entry.write));
        batch.push(Row { key, fields: entry.fields });
      }
      if batch.is_empty() {
        continue;
      }

      match gateway.batch_upsert(kind, batch).await {
        Ok(()) => {
          tracing::debug!(%kind, rows = sent.len(), "batch flushed");
          if kind == EntityKind::Bout {
            let mut failed_bouts = locked(&self.failed_bouts);
            for (key, _) in &sent {
              failed_bouts.remove(key);
            }
          }
          report.outcomes.extend(sent.into_iter().map(|(key, write)| {
            let outcome = match write {
              Write::Insert => Outcome::Inserted,
              Write::Update => Outcome::Updated,
            };
            (key, outcome)
          }));
        }
        Err(error) => {
          tracing::warn!(%kind, rows = sent.len(), %error, "batch flush failed");
          if kind == EntityKind::Bout {
            locked(&self.failed_bouts).extend(sent.iter().map(|(key, _)| key.clone()));
          }
          report
            .outcomes
            .extend(sent.into_iter().map(|(key, _)| (key, Outcome::Failed)));
        }
      }
    }
    report
  }

  fn parent_failed(&self, key: &EntityKey) -> bool {
    key
      .parent_bout()
      .is_some_and(|parent| locked(&self.failed_bouts).contains(&parent))
  }
}

fn merge(into: &mut FieldMap, fields: FieldMap) {
  for (name, value) in fields {
    if !value.is_null() {
      into.insert(name, value);
    }
  }
}
