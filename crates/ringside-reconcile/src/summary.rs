//! Per-record outcomes and the end-of-run summary.

use std::{collections::BTreeMap, fmt};

use ringside_core::{EntityKey, EntityKind};
use serde::Serialize;
use strum::IntoEnumIterator;

// ─── Outcomes ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
  /// No identity key could be derived.
  Malformed(String),
  /// The parent bout never appeared, not even in the shutdown rescue pass.
  Orphaned { parent: EntityKey },
}

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  Inserted,
  Updated,
  /// Already present and unchanged, or already resolved this run.
  Skipped,
  /// Parked until the parent bout exists.
  Held,
  Dropped(DropReason),
  /// A gateway call failed or timed out. Only this record is affected.
  Failed,
}

impl Outcome {
  pub fn is_write(&self) -> bool { matches!(self, Self::Inserted | Self::Updated) }
}

// ─── Summary ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
  pub inserted: usize,
  pub updated:  usize,
  pub skipped:  usize,
  pub held:     usize,
  pub dropped:  usize,
  pub failed:   usize,
}

impl KindCounts {
  fn record(&mut self, outcome: &Outcome) {
    match outcome {
      Outcome::Inserted => self.inserted += 1,
      Outcome::Updated => self.updated += 1,
      Outcome::Skipped => self.skipped += 1,
      Outcome::Held => self.held += 1,
      Outcome::Dropped(_) => self.dropped += 1,
      Outcome::Failed => self.failed += 1,
    }
  }

  fn add(&mut self, other: &Self) {
    self.inserted += other.inserted;
    self.updated += other.updated;
    self.skipped += other.skipped;
    self.held += other.held;
    self.dropped += other.dropped;
    self.failed += other.failed;
  }

  /// Writes that reached the store.
  pub fn written(&self) -> usize { self.inserted + self.updated }
}

/// Counts for one run. `held` counts deferrals, so a participation that was
/// held and later inserted shows up in both columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
  pub kinds:              BTreeMap<EntityKind, KindCounts>,
  pub orphaned:           usize,
  pub malformed:          usize,
  /// Input that did not decode into a candidate of any kind.
  pub undecodable:        usize,
  pub enrichment_signals: usize,
}

impl RunSummary {
  pub fn record(&mut self, kind: EntityKind, outcome: &Outcome) {
    self.kinds.entry(kind).or_default().record(outcome);
    match outcome {
      Outcome::Dropped(DropReason::Orphaned { .. }) => self.orphaned += 1,
      Outcome::Dropped(DropReason::Malformed(_)) => self.malformed += 1,
      _ => {}
    }
  }

  pub fn record_undecodable(&mut self) { self.undecodable += 1; }

  pub fn counts(&self, kind: EntityKind) -> KindCounts {
    self.kinds.get(&kind).copied().unwrap_or_default()
  }

  pub fn total(&self) -> KindCounts {
    let mut total = KindCounts::default();
    for counts in self.kinds.values() {
      total.add(counts);
    }
    total
  }

  /// Nothing was lost: no drops, failures, orphans or undecodable input.
  pub fn is_clean(&self) -> bool {
    let total = self.total();
    total.dropped == 0
      && total.failed == 0
      && self.orphaned == 0
      && self.undecodable == 0
  }

  /// Emit the summary as one structured event.
  pub fn log(&self) {
    let total = self.total();
    if self.is_clean() {
      tracing::info!(
        inserted = total.inserted,
        updated = total.updated,
        skipped = total.skipped,
        enrichment_signals = self.enrichment_signals,
        "run complete"
      );
    } else {
      tracing::error!(
        inserted = total.inserted,
        updated = total.updated,
        skipped = total.skipped,
        dropped = total.dropped,
        failed = total.failed,
        orphaned = self.orphaned,
        malformed = self.malformed,
        undecodable = self.undecodable,
        "run complete with losses"
      );
    }
  }
}

impl fmt::Display for RunSummary {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(
      f,
      "{:<14}{:>9}{:>9}{:>9}{:>9}{:>9}{:>9}",
      "kind", "inserted", "updated", "skipped", "held", "dropped", "failed"
    )?;
    for kind in EntityKind::iter() {
      let c = self.counts(kind);
      writeln!(
        f,
        "{:<14}{:>9}{:>9}{:>9}{:>9}{:>9}{:>9}",
        kind.to_string(),
        c.inserted,
        c.updated,
        c.skipped,
        c.held,
        c.dropped,
        c.failed
      )?;
    }
    write!(
      f,
      "orphaned: {}  malformed: {}  undecodable: {}  enrichment signals: {}",
      self.orphaned, self.malformed, self.undecodable, self.enrichment_signals
    )
  }
}
