//! The reconciler: decides, per record, the minimal write against the store.
//!
//! | Kind          | Policy                                                    |
//! |---------------|-----------------------------------------------------------|
//! | Event, Bout   | lookup, then insert, update changed fields, or skip       |
//! | Competitor    | insert once if absent; never updated by this pipeline     |
//! | Participation | as Event, but parked until its bout exists                |
//!
//! A bout counts as existing once it is confirmed present in the store or
//! written by this run. Records are routed concurrently; writes to any one
//! key are serialized through [`KeyLocks`].

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use ringside_core::{Candidate, EntityKey, EntityKind, FieldMap, Record, store::RecordStore};
use tokio::sync::mpsc;

use crate::{
  Result,
  buffer::{DependencyBuffer, Hold},
  compare::Comparator,
  config::{ReconcileConfig, WriteMode},
  dedup::{Deduplicator, KeyLocks, Known},
  flusher::{BatchFlusher, FlushReport},
  gateway::Gateway,
  summary::{DropReason, Outcome, RunSummary},
};

/// Events for other components. Delivery is best effort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
  /// A competitor was inserted without the fields only its profile page
  /// provides.
  NeedsEnrichment {
    competitor_id: String,
    profile_url:   String,
  },
}

pub struct Reconciler<S> {
  gateway:     Gateway<S>,
  comparator:  Comparator,
  buffer:      DependencyBuffer,
  dedup:       Deduplicator,
  locks:       KeyLocks,
  flusher:     BatchFlusher,
  mode:        WriteMode,
  abort_after: usize,
  summary:     Mutex<RunSummary>,
  signals:     Option<mpsc::UnboundedSender<Signal>>,
}

impl<S: RecordStore> Reconciler<S> {
  pub fn new(store: Arc<S>, config: &ReconcileConfig) -> Self {
    Self {
      gateway:     Gateway::new(store, config.call_timeout()),
      comparator:  Comparator::new(config.ignore_fields.iter().cloned()),
      buffer:      DependencyBuffer::new(),
      dedup:       Deduplicator::new(),
      locks:       KeyLocks::new(),
      flusher:     BatchFlusher::new(),
      mode:        config.write_mode,
      abort_after: config.abort_after_consecutive_failures,
      summary:     Mutex::new(RunSummary::default()),
      signals:     None,
    }
  }

  /// Deliver [`Signal`]s to `tx`.
  pub fn with_signals(mut self, tx: mpsc::UnboundedSender<Signal>) -> Self {
    self.signals = Some(tx);
    self
  }

  pub fn gateway(&self) -> &Gateway<S> { &self.gateway }

  pub fn summary(&self) -> RunSummary { self.summary_lock().clone() }

  /// Participations currently waiting on a bout.
  pub fn held(&self) -> usize { self.buffer.pending_len() }

  /// Writes decided but not yet sent (batched mode only).
  pub fn staged(&self) -> usize { self.flusher.staged_len() }

  /// True once the configured number of gateway calls failed in a row.
  pub fn gateway_unavailable(&self) -> bool {
    self.abort_after > 0 && self.gateway.consecutive_failures() >= self.abort_after
  }

  fn summary_lock(&self) -> MutexGuard<'_, RunSummary> {
    self.summary.lock().unwrap_or_else(PoisonError::into_inner)
  }

  // ─── Intake ────────────────────────────────────────────────────────────────

  /// Decode one line of extraction output. A line that is not a candidate
  /// of any kind is logged and counted as undecodable.
  pub fn decode(&self, line: usize, text: &str) -> Option<Candidate> {
    match serde_json::from_str(text) {
      Ok(candidate) => Some(candidate),
      Err(error) => {
        tracing::warn!(line, %error, "dropping undecodable record");
        self.summary_lock().record_undecodable();
        None
      }
    }
  }

  /// Derive the identity key. A candidate without one is logged, counted,
  /// and handed back as a [`DropReason::Malformed`] outcome.
  pub fn prepare(&self, candidate: Candidate) -> Result<Record, Outcome> {
    let kind = candidate.kind();
    if let Err(error) = candidate.key() {
      tracing::warn!(%kind, %error, ?candidate, "dropping malformed record");
      return Err(self.malformed(kind, &error));
    }
    Record::new(candidate).map_err(|error| {
      tracing::warn!(%kind, %error, "dropping malformed record");
      self.malformed(kind, &error)
    })
  }

  fn malformed(&self, kind: EntityKind, error: &ringside_core::Error) -> Outcome {
    let outcome = Outcome::Dropped(DropReason::Malformed(error.to_string()));
    self.tally(kind, &outcome);
    outcome
  }

  /// [`prepare`](Self::prepare) then [`route`](Self::route).
  pub async fn admit(&self, candidate: Candidate) -> Outcome {
    match self.prepare(candidate) {
      Ok(record) => self.route(record).await,
      Err(outcome) => outcome,
    }
  }

  /// Reconcile one record. Failures are logged and returned as
  /// [`Outcome::Failed`]; they never affect other records.
  pub async fn route(&self, record: Record) -> Outcome {
    let kind = record.kind();
    let key = record.key().clone();
    let result = match kind {
      EntityKind::Event => self.route_keyed(record).await,
      EntityKind::Bout => self.route_bout(record).await,
      EntityKind::Competitor => self.route_competitor(record).await,
      EntityKind::Participation => self.route_participation(record).await,
    };
    self.settle(&key, result)
  }

  fn settle(&self, key: &EntityKey, result: Result<Outcome>) -> Outcome {
    let outcome = match result {
      Ok(outcome) => outcome,
      Err(error) => {
        tracing::warn!(kind = %key.kind(), %key, %error, "reconciliation failed");
        Outcome::Failed
      }
    };
    self.tally(key.kind(), &outcome);
    outcome
  }

  /// Staged writes are counted when their flush settles.
  fn tally(&self, kind: EntityKind, outcome: &Outcome) {
    if self.mode == WriteMode::Batched && outcome.is_write() {
      return;
    }
    self.summary_lock().record(kind, outcome);
  }

  // ─── Per-kind policies ─────────────────────────────────────────────────────

  async fn route_keyed(&self, record: Record) -> Result<Outcome> {
    let _guard = self.locks.lock(record.key()).await;
    self.upsert(&record).await
  }

  async fn route_bout(&self, record: Record) -> Result<Outcome> {
    let key = record.key().clone();
    let outcome = self.route_keyed(record).await?;
    self.release(&key).await;
    Ok(outcome)
  }

  async fn route_competitor(&self, record: Record) -> Result<Outcome> {
    let key = record.key().clone();
    let _guard = self.locks.lock(&key).await;
    if self.dedup.already_resolved(EntityKind::Competitor, &key) {
      tracing::debug!(%key, "competitor already resolved this run");
      return Ok(Outcome::Skipped);
    }
    let result = self.insert_if_absent(&record).await;
    self.dedup.mark_resolved(EntityKind::Competitor, key);
    result
  }

  async fn insert_if_absent(&self, record: &Record) -> Result<Outcome> {
    if self.gateway.get_by_key(record.key()).await?.is_some() {
      tracing::debug!(key = %record.key(), "competitor exists; skipping");
      return Ok(Outcome::Skipped);
    }
    let outcome = self.insert(record).await?;
    self.signal_enrichment(record);
    Ok(outcome)
  }

  async fn route_participation(&self, record: Record) -> Result<Outcome> {
    let Some(parent) = record.parent_bout() else {
      return self.route_keyed(record).await;
    };
    if self.parent_confirmed(&parent).await? {
      return self.route_keyed(record).await;
    }
    let key = record.key().clone();
    match self.buffer.hold(record) {
      Hold::Parked => {
        tracing::debug!(%key, bout = %parent, "bout not present yet; holding");
        Ok(Outcome::Held)
      }
      Hold::ParentReady(record) => self.route_keyed(record).await,
    }
  }

  /// Whether `bout` exists, reading it from the store at most once per run.
  /// The bout lock is released before any participation lock is taken.
  async fn parent_confirmed(&self, bout: &EntityKey) -> Result<bool> {
    if self.buffer.is_parent_ready(bout) {
      return Ok(true);
    }
    let known = {
      let _guard = self.locks.lock(bout).await;
      if self.buffer.is_parent_ready(bout) {
        return Ok(true);
      }
      self.lookup(bout).await?
    };
    match known {
      Known::Absent => Ok(false),
      Known::Present(_) => {
        self.release(bout).await;
        Ok(true)
      }
    }
  }

  /// Mark `bout` ready and reconcile whatever was parked under it.
  async fn release(&self, bout: &EntityKey) {
    let released = self.buffer.release(bout);
    if released.is_empty() {
      return;
    }
    tracing::debug!(%bout, count = released.len(), "releasing held participations");
    for record in released {
      let key = record.key().clone();
      let result = self.route_keyed(record).await;
      self.settle(&key, result);
    }
  }

  // ─── Lookup and writes ─────────────────────────────────────────────────────

  /// Caller holds the key's lock. Failed reads are not cached.
  async fn lookup(&self, key: &EntityKey) -> Result<Known> {
    if let Some(known) = self.dedup.known(key) {
      return Ok(known);
    }
    let known = match self.gateway.get_by_key(key).await? {
      Some(row) => Known::Present(row),
      None => Known::Absent,
    };
    self.dedup.remember(key.clone(), known.clone());
    Ok(known)
  }

  /// Insert when absent, update the changed fields, or skip.
  async fn upsert(&self, record: &Record) -> Result<Outcome> {
    let key = record.key();
    let kind = record.kind();
    let stored = match self.lookup(key).await? {
      Known::Absent => return self.insert(record).await,
      Known::Present(stored) => stored,
    };

    let mut changes = record.assignments()?;
    protect_sticky(kind, &mut changes, &stored);
    let changed: Vec<String> = self
      .comparator
      .changed_fields(kind, &changes, &stored)
      .into_iter()
      .map(str::to_owned)
      .collect();
    if changed.is_empty() {
      tracing::debug!(%key, "unchanged; skipping");
      return Ok(Outcome::Skipped);
    }
    changes.retain(|name, _| changed.contains(name));
    tracing::debug!(%key, fields = ?changed, "updating");
    self.update(key, changes).await
  }

  async fn insert(&self, record: &Record) -> Result<Outcome> {
    let row = record.to_row()?;
    let key = row.key.clone();
    let fields = row.fields.clone();
    match self.mode {
      WriteMode::Immediate => self.gateway.insert(row).await?,
      WriteMode::Batched => self.flusher.stage_insert(row),
    }
    tracing::debug!(%key, "inserted");
    self.dedup.apply(&key, &fields);
    Ok(Outcome::Inserted)
  }

  async fn update(&self, key: &EntityKey, changes: FieldMap) -> Result<Outcome> {
    match self.mode {
      WriteMode::Immediate => self.gateway.update(key, changes.clone()).await?,
      WriteMode::Batched => self.flusher.stage_update(key.clone(), changes.clone()),
    }
    self.dedup.apply(key, &changes);
    Ok(Outcome::Updated)
  }

  fn signal_enrichment(&self, record: &Record) {
    let Candidate::Competitor(competitor) = record.candidate() else {
      return;
    };
    let Some(profile_url) = competitor
      .profile_url
      .as_set()
      .filter(|url| !url.trim().is_empty())
    else {
      return;
    };
    if !competitor.lacks_biography() {
      return;
    }
    let EntityKey::Competitor { competitor_id } = record.key() else {
      return;
    };

    self.summary_lock().enrichment_signals += 1;
    let signal = Signal::NeedsEnrichment {
      competitor_id: competitor_id.clone(),
      profile_url:   profile_url.clone(),
    };
    if let Some(tx) = &self.signals
      && tx.send(signal).is_err()
    {
      tracing::debug!(%competitor_id, "no enrichment subscriber");
    }
  }

  // ─── Flush and shutdown ────────────────────────────────────────────────────

  /// Send staged writes. A no-op in immediate mode.
  pub async fn flush(&self) -> FlushReport {
    if self.mode != WriteMode::Batched {
      return FlushReport::default();
    }
    let report = self.flusher.flush(&self.gateway).await;
    let mut summary = self.summary_lock();
    for (key, outcome) in &report.outcomes {
      if *outcome == Outcome::Failed {
        // The cached row assumed this write would land.
        self.dedup.forget(key);
      }
      summary.record(key.kind(), outcome);
    }
    report
  }

  /// End the run: flush, give every held participation one last chance
  /// against the store, flush again, and report what is left as orphaned.
  pub async fn shutdown(&self) -> RunSummary {
    self.flush().await;

    let held = self.buffer.drain_for_shutdown();
    if !held.is_empty() {
      let parents: Vec<EntityKey> = held.keys().cloned().collect();
      tracing::info!(
        bouts = parents.len(),
        participations = held.values().map(Vec::len).sum::<usize>(),
        "rescue pass over held participations"
      );
      let present = match self
        .gateway
        .get_many_by_keys(EntityKind::Bout, parents)
        .await
      {
        Ok(present) => present,
        Err(error) => {
          tracing::error!(%error, "rescue lookup failed");
          HashMap::new()
        }
      };

      for (parent, records) in held {
        match present.get(&parent) {
          Some(row) => {
            self.dedup.remember(parent.clone(), Known::Present(row.clone()));
            self.buffer.release(&parent);
            for record in records {
              let key = record.key().clone();
              let result = self.route_keyed(record).await;
              self.settle(&key, result);
            }
          }
          None => {
            for record in records {
              self.orphan(&parent, &record);
            }
          }
        }
      }
      self.flush().await;
    }

    self.summary()
  }

  fn orphan(&self, parent: &EntityKey, record: &Record) {
    let fields = record
      .fields()
      .ok()
      .and_then(|fields| serde_json::to_string(&fields).ok())
      .unwrap_or_default();
    tracing::error!(
      participation = %record.key(),
      bout = %parent,
      %fields,
      "orphaned participation: its bout never appeared"
    );
    self.settle(
      record.key(),
      Ok(Outcome::Dropped(DropReason::Orphaned { parent: parent.clone() })),
    );
  }
}

/// Keep stored sticky values when the candidate only has a placeholder.
fn protect_sticky(kind: EntityKind, changes: &mut FieldMap, stored: &FieldMap) {
  changes.retain(|name, value| {
    let Some(spec) = kind.spec(name).filter(|spec| spec.sticky) else {
      return true;
    };
    let stored_is_real = stored.get(name).is_some_and(|v| !spec.is_placeholder(v));
    !(stored_is_real && spec.is_placeholder(value))
  });
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn map(value: serde_json::Value) -> FieldMap {
    match value {
      serde_json::Value::Object(map) => map,
      _ => panic!("expected object"),
    }
  }

  #[test]
  fn sticky_fields_survive_placeholders() {
    let stored = map(json!({ "result": "win", "corner": "red", "odds_value": -200 }));
    let mut changes = map(json!({ "result": "pending", "corner": "", "odds_value": -250 }));
    protect_sticky(EntityKind::Participation, &mut changes, &stored);
    assert_eq!(changes, map(json!({ "odds_value": -250 })));
  }

  #[test]
  fn sticky_fields_accept_real_values() {
    let stored = map(json!({ "result": "pending" }));
    let mut changes = map(json!({ "result": "win" }));
    protect_sticky(EntityKind::Participation, &mut changes, &stored);
    assert_eq!(changes["result"], json!("win"));

    let stored = map(json!({ "result": "win" }));
    let mut changes = map(json!({ "result": "loss" }));
    protect_sticky(EntityKind::Participation, &mut changes, &stored);
    assert_eq!(changes["result"], json!("loss"));
  }

  #[test]
  fn non_sticky_fields_take_empty_strings() {
    let stored = map(json!({ "venue": "Apex" }));
    let mut changes = map(json!({ "venue": "" }));
    protect_sticky(EntityKind::Event, &mut changes, &stored);
    assert_eq!(changes["venue"], json!(""));
  }
}
