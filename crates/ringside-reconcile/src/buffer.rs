//! Dependency buffer: participations parked until their bout exists.
//!
//! Each bout key has one slot holding a `ready` flag and the participations
//! waiting on it. Both live under the same lock, so a participation is either
//! parked before the bout's release drains the slot, or it observes `ready`
//! and proceeds. It can never be parked after the release has run.

use std::{
  collections::{BTreeMap, HashMap},
  sync::{Mutex, MutexGuard, PoisonError},
};

use ringside_core::{EntityKey, Record};

#[derive(Debug, Default)]
struct Slot {
  ready:   bool,
  pending: Vec<Record>,
}

/// Result of [`DependencyBuffer::hold`].
#[derive(Debug)]
pub enum Hold {
  /// Parked; it will come back from `release` or `drain_for_shutdown`.
  Parked,
  /// The parent became ready before the record could be parked. The caller
  /// must process the record itself.
  ParentReady(Record),
}

#[derive(Debug, Default)]
pub struct DependencyBuffer {
  slots: Mutex<HashMap<EntityKey, Slot>>,
}

impl DependencyBuffer {
  pub fn new() -> Self { Self::default() }

  fn slots(&self) -> MutexGuard<'_, HashMap<EntityKey, Slot>> {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Whether the bout has been confirmed present during this run.
  pub fn is_parent_ready(&self, bout: &EntityKey) -> bool {
    self.slots().get(bout).is_some_and(|slot| slot.ready)
  }

  /// Park a participation under its parent bout. A participation already
  /// parked with the same key is replaced in place.
  pub fn hold(&self, record: Record) -> Hold {
    let Some(parent) = record.parent_bout() else {
      return Hold::ParentReady(record);
    };
    let mut slots = self.slots();
    let slot = slots.entry(parent).or_default();
    if slot.ready {
      return Hold::ParentReady(record);
    }
    match slot.pending.iter_mut().find(|held| held.key() == record.key()) {
      Some(held) => *held = record,
      None => slot.pending.push(record),
    }
    Hold::Parked
  }

  /// Mark the bout ready and hand back everything parked under it, in
  /// arrival order. Later calls return nothing.
  pub fn release(&self, bout: &EntityKey) -> Vec<Record> {
    let mut slots = self.slots();
    let slot = slots.entry(bout.clone()).or_default();
    slot.ready = true;
    std::mem::take(&mut slot.pending)
  }

  /// Take every participation still parked, grouped by parent bout.
  pub fn drain_for_shutdown(&self) -> BTreeMap<EntityKey, Vec<Record>> {
    self
      .slots()
      .iter_mut()
      .filter(|(_, slot)| !slot.pending.is_empty())
      .map(|(bout, slot)| (bout.clone(), std::mem::take(&mut slot.pending)))
      .collect()
  }

  /// Number of participations currently parked.
  pub fn pending_len(&self) -> usize {
    self.slots().values().map(|slot| slot.pending.len()).sum()
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn participation(bout: &str, competitor: &str, odds: i32) -> Record {
    Record::from_json(json!({
      "item_type": "participation",
      "bout_id": bout,
      "competitor_id": competitor,
      "odds_value": odds,
    }))
    .unwrap()
  }

  #[test]
  fn hold_then_release_returns_in_arrival_order() {
    let buffer = DependencyBuffer::new();
    let b9 = EntityKey::bout("B9");
    assert!(!buffer.is_parent_ready(&b9));
    assert!(matches!(buffer.hold(participation("B9", "C1", -350)), Hold::Parked));
    assert!(matches!(buffer.hold(participation("B9", "C2", 280)), Hold::Parked));
    assert_eq!(buffer.pending_len(), 2);

    let released = buffer.release(&b9);
    let keys: Vec<_> = released.iter().map(|r| r.key().clone()).collect();
    assert_eq!(keys, [
      EntityKey::participation("B9", "C1"),
      EntityKey::participation("B9", "C2"),
    ]);
    assert!(buffer.is_parent_ready(&b9));
    assert!(buffer.release(&b9).is_empty());
  }

  #[test]
  fn hold_after_release_is_refused() {
    let buffer = DependencyBuffer::new();
    buffer.release(&EntityKey::bout("B1"));
    match buffer.hold(participation("B1", "C1", 100)) {
      Hold::ParentReady(record) => {
        assert_eq!(record.key(), &EntityKey::participation("B1", "C1"));
      }
      Hold::Parked => panic!("parked under a ready bout"),
    }
    assert_eq!(buffer.pending_len(), 0);
  }

  #[test]
  fn same_key_is_replaced_not_duplicated() {
    let buffer = DependencyBuffer::new();
    buffer.hold(participation("B2", "C1", -120));
    buffer.hold(participation("B2", "C9", 110));
    buffer.hold(participation("B2", "C1", -150));
    assert_eq!(buffer.pending_len(), 2);

    let released = buffer.release(&EntityKey::bout("B2"));
    assert_eq!(released[0].key(), &EntityKey::participation("B2", "C1"));
    assert_eq!(released[0].assignments().unwrap()["odds_value"], json!(-150));
  }

  #[test]
  fn drain_groups_by_parent_and_skips_empty_slots() {
    let buffer = DependencyBuffer::new();
    buffer.hold(participation("B1", "C1", 100));
    buffer.hold(participation("B3", "C1", 100));
    buffer.hold(participation("B3", "C2", 100));
    buffer.release(&EntityKey::bout("B1"));

    let drained = buffer.drain_for_shutdown();
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[&EntityKey::bout("B3")].len(), 2);
    assert_eq!(buffer.pending_len(), 0);
  }
}
