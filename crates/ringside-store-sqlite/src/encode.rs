//! Encoding and decoding helpers between domain types and SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings. Non-key fields are stored as a
//! compact JSON object. Identity columns are plain text.

use chrono::{DateTime, Utc};
use ringside_core::{EntityKey, EntityKind, FieldMap};
use serde_json::Value;

use crate::{Error, Result};

// ─── Tables & statements ─────────────────────────────────────────────────────

pub fn table(kind: EntityKind) -> &'static str {
  match kind {
    EntityKind::Event => "events",
    EntityKind::Bout => "bouts",
    EntityKind::Competitor => "competitors",
    EntityKind::Participation => "participations",
  }
}

/// `bout_id = ?1 AND competitor_id = ?2`, numbered from 1.
fn key_predicate(kind: EntityKind) -> String {
  kind
    .key_fields()
    .iter()
    .enumerate()
    .map(|(i, column)| format!("{column} = ?{}", i + 1))
    .collect::<Vec<_>>()
    .join(" AND ")
}

pub fn select_sql(kind: EntityKind) -> String {
  format!(
    "SELECT {}, fields, created_at, updated_at FROM {} WHERE {}",
    kind.key_fields().join(", "),
    table(kind),
    key_predicate(kind),
  )
}

pub fn insert_sql(kind: EntityKind) -> String {
  let columns = kind.key_fields();
  let placeholders = (1..=columns.len() + 3)
    .map(|i| format!("?{i}"))
    .collect::<Vec<_>>()
    .join(", ");
  format!(
    "INSERT INTO {} ({}, fields, created_at, updated_at) VALUES ({placeholders})",
    table(kind),
    columns.join(", "),
  )
}

/// Key parameters come first, then `fields`, then `updated_at`.
pub fn update_sql(kind: EntityKind) -> String {
  let n = kind.key_fields().len();
  format!(
    "UPDATE {} SET fields = ?{}, updated_at = ?{} WHERE {}",
    table(kind),
    n + 1,
    n + 2,
    key_predicate(kind),
  )
}

// ─── Keys ────────────────────────────────────────────────────────────────────

pub fn encode_key(key: &EntityKey) -> Vec<String> {
  key.columns().into_iter().map(|(_, v)| v.to_owned()).collect()
}

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Fields ──────────────────────────────────────────────────────────────────

/// Encode a new row's fields. `null` values are dropped: the store has no
/// notion of an explicitly unknown field.
pub fn encode_fields(fields: &FieldMap) -> serde_json::Result<String> {
  let mut kept = fields.clone();
  kept.retain(|_, v| !v.is_null());
  serde_json::to_string(&kept)
}

/// Merge `incoming` into the stored JSON object. Present values replace the
/// stored ones wholesale; `null` values are ignored; nothing is removed.
pub fn merge_fields(
  stored: &str,
  incoming: &FieldMap,
) -> serde_json::Result<String> {
  let mut merged: FieldMap = serde_json::from_str(stored)?;
  for (name, value) in incoming {
    if !value.is_null() {
      merged.insert(name.clone(), value.clone());
    }
  }
  serde_json::to_string(&merged)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a row of any entity table.
pub struct RawRow {
  pub key_values: Vec<String>,
  pub fields:     String,
  pub created_at: String,
  pub updated_at: String,
}

impl RawRow {
  pub fn from_sql(
    kind: EntityKind,
    row: &rusqlite::Row<'_>,
  ) -> rusqlite::Result<Self> {
    let n = kind.key_fields().len();
    Ok(Self {
      key_values: (0..n)
        .map(|i| row.get(i))
        .collect::<rusqlite::Result<_>>()?,
      fields:     row.get(n)?,
      created_at: row.get(n + 1)?,
      updated_at: row.get(n + 2)?,
    })
  }

  /// Flatten into the shape the reconciler compares against: identity
  /// columns, stored fields, then `created_at` / `updated_at`.
  pub fn into_field_map(self, kind: EntityKind) -> Result<FieldMap> {
    let mut map = FieldMap::new();
    for (column, value) in kind.key_fields().iter().zip(self.key_values) {
      map.insert((*column).to_owned(), Value::String(value));
    }
    let stored: FieldMap = serde_json::from_str(&self.fields)?;
    map.extend(stored);
    map.insert(
      "created_at".into(),
      Value::String(encode_dt(decode_dt(&self.created_at)?)),
    );
    map.insert(
      "updated_at".into(),
      Value::String(encode_dt(decode_dt(&self.updated_at)?)),
    );
    Ok(map)
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn participation_statements_use_composite_key() {
    assert_eq!(
      select_sql(EntityKind::Participation),
      "SELECT bout_id, competitor_id, fields, created_at, updated_at \
       FROM participations WHERE bout_id = ?1 AND competitor_id = ?2"
    );
    assert_eq!(
      update_sql(EntityKind::Participation),
      "UPDATE participations SET fields = ?3, updated_at = ?4 \
       WHERE bout_id = ?1 AND competitor_id = ?2"
    );
    assert!(insert_sql(EntityKind::Event).ends_with("VALUES (?1, ?2, ?3, ?4)"));
  }

  #[test]
  fn merge_replaces_present_and_keeps_the_rest() {
    let stored = r#"{"result":"win","record_after":{"wins":3,"losses":0}}"#;
    let mut incoming = FieldMap::new();
    incoming.insert("record_after".into(), json!({ "wins": 4, "losses": 0 }));
    incoming.insert("result".into(), Value::Null);
    incoming.insert("odds_value".into(), json!(-120));

    let merged: FieldMap =
      serde_json::from_str(&merge_fields(stored, &incoming).unwrap()).unwrap();
    assert_eq!(merged["result"], json!("win"));
    assert_eq!(merged["record_after"], json!({ "wins": 4, "losses": 0 }));
    assert_eq!(merged["odds_value"], json!(-120));
  }
}
