//! Field comparator: candidate fields vs. the stored row.
//!
//! Decides whether a candidate carries anything the store does not already
//! have. Values are compared according to the field's [`FieldClass`], so
//! representational noise (`"72"` vs `72.0`, trailing whitespace, a JSON
//! object stored as text, `Z` vs `+00:00`) never counts as a change.

use std::{borrow::Cow, collections::HashSet};

use chrono::{DateTime, NaiveDateTime, Utc};
use ringside_core::{EntityKind, FieldClass, FieldMap};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct Comparator {
  ignore: HashSet<String>,
}

impl Default for Comparator {
  fn default() -> Self { Self::new(["created_at", "updated_at"]) }
}

impl Comparator {
  pub fn new<I, S>(ignore: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self { ignore: ignore.into_iter().map(Into::into).collect() }
  }

  /// True as soon as one non-ignored candidate field differs from `stored`.
  /// Fields the candidate does not carry are never consulted.
  pub fn has_changed(
    &self,
    kind: EntityKind,
    candidate: &FieldMap,
    stored: &FieldMap,
  ) -> bool {
    candidate
      .iter()
      .any(|(name, value)| self.field_changed(kind, name, value, stored))
  }

  /// Every candidate field that differs from `stored`, in candidate order.
  pub fn changed_fields<'a>(
    &self,
    kind: EntityKind,
    candidate: &'a FieldMap,
    stored: &FieldMap,
  ) -> Vec<&'a str> {
    candidate
      .iter()
      .filter(|(name, value)| self.field_changed(kind, name, value, stored))
      .map(|(name, _)| name.as_str())
      .collect()
  }

  fn field_changed(
    &self,
    kind: EntityKind,
    name: &str,
    candidate: &Value,
    stored: &FieldMap,
  ) -> bool {
    if self.ignore.contains(name) {
      return false;
    }
    let Some(stored) = stored.get(name) else {
      return true;
    };
    match (candidate.is_null(), stored.is_null()) {
      (true, true) => false,
      (true, false) | (false, true) => true,
      (false, false) => values_differ(kind.classify(name), candidate, stored),
    }
  }
}

/// Both values are non-null.
fn values_differ(class: FieldClass, a: &Value, b: &Value) -> bool {
  match class {
    FieldClass::Structured => structured(a) != structured(b),
    FieldClass::Numeric => match (numeric(a), numeric(b)) {
      (Some(x), Some(y)) => x != y,
      _ => {
        tracing::trace!(%a, %b, "non-numeric value in numeric field; comparing as text");
        normalized(a) != normalized(b)
      }
    },
    FieldClass::Timestamp => match (instant(a), instant(b)) {
      (Some(x), Some(y)) => x != y,
      _ => normalized(a) != normalized(b),
    },
    FieldClass::Scalar => normalized(a) != normalized(b),
  }
}

/// A structured value may come back from the store as its JSON text.
fn structured(value: &Value) -> Cow<'_, Value> {
  if let Value::String(text) = value
    && let Ok(parsed) = serde_json::from_str::<Value>(text)
    && (parsed.is_object() || parsed.is_array())
  {
    return Cow::Owned(parsed);
  }
  Cow::Borrowed(value)
}

fn numeric(value: &Value) -> Option<f64> {
  match value {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
    _ => None,
  }
}

/// RFC 3339 with any offset, or a naive ISO timestamp taken as UTC.
fn instant(value: &Value) -> Option<DateTime<Utc>> {
  let text = value.as_str()?.trim();
  if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
    return Some(parsed.with_timezone(&Utc));
  }
  ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
    .iter()
    .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
    .map(|naive| naive.and_utc())
}

fn normalized(value: &Value) -> Cow<'_, str> {
  match value {
    Value::String(s) => Cow::Borrowed(s.trim()),
    other => Cow::Owned(other.to_string()),
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn map(value: Value) -> FieldMap {
    match value {
      Value::Object(map) => map,
      _ => panic!("expected object"),
    }
  }

  #[test]
  fn numeric_representations_compare_equal() {
    let stored = map(json!({
      "reach": "72",
      "record": { "wins": 10, "losses": 1, "draws": 0 },
    }));
    let candidate = map(json!({
      "reach": 72.0,
      "record": { "wins": 10, "losses": 1, "draws": 0 },
    }));
    let cmp = Comparator::default();
    assert!(!cmp.has_changed(EntityKind::Competitor, &candidate, &stored));
  }

  #[test]
  fn structured_difference_is_a_change() {
    let stored = map(json!({ "record": { "wins": 10, "losses": 1, "draws": 0 } }));
    let candidate = map(json!({ "record": { "wins": 11, "losses": 1, "draws": 0 } }));
    let cmp = Comparator::default();
    assert!(cmp.has_changed(EntityKind::Competitor, &candidate, &stored));
    assert_eq!(
      cmp.changed_fields(EntityKind::Competitor, &candidate, &stored),
      ["record"]
    );
  }

  #[test]
  fn structured_value_stored_as_text() {
    let stored = map(json!({ "record_after": r#"{"wins":3,"losses":0,"draws":0}"# }));
    let candidate = map(json!({ "record_after": { "wins": 3, "losses": 0, "draws": 0 } }));
    let cmp = Comparator::default();
    assert!(!cmp.has_changed(EntityKind::Participation, &candidate, &stored));
  }

  #[test]
  fn scalars_are_trimmed() {
    let stored = map(json!({ "venue": "T-Mobile Arena " }));
    let candidate = map(json!({ "venue": "  T-Mobile Arena" }));
    assert!(!Comparator::default().has_changed(EntityKind::Event, &candidate, &stored));
  }

  #[test]
  fn field_absent_from_store_is_a_change() {
    let stored = map(json!({ "name": "Fight Night" }));
    let candidate = map(json!({ "name": "Fight Night", "venue": "Apex" }));
    let cmp = Comparator::default();
    assert_eq!(cmp.changed_fields(EntityKind::Event, &candidate, &stored), ["venue"]);
  }

  #[test]
  fn fields_only_in_store_are_ignored() {
    let stored = map(json!({ "name": "Fight Night", "venue": "Apex" }));
    let candidate = map(json!({ "name": "Fight Night" }));
    assert!(!Comparator::default().has_changed(EntityKind::Event, &candidate, &stored));
  }

  #[test]
  fn null_against_value_is_a_change_and_null_against_null_is_not() {
    let stored = map(json!({ "nickname": null, "style": "Striker" }));
    let cmp = Comparator::default();
    let both_null = map(json!({ "nickname": null }));
    assert!(!cmp.has_changed(EntityKind::Competitor, &both_null, &stored));
    let one_null = map(json!({ "style": null }));
    assert!(cmp.has_changed(EntityKind::Competitor, &one_null, &stored));
  }

  #[test]
  fn ignored_fields_never_count() {
    let stored = map(json!({ "updated_at": "2024-01-01T00:00:00Z", "name": "A" }));
    let candidate = map(json!({ "updated_at": "2025-06-01T00:00:00Z", "name": "A" }));
    assert!(!Comparator::default().has_changed(EntityKind::Event, &candidate, &stored));

    let strict = Comparator::new(Vec::<String>::new());
    assert!(strict.has_changed(EntityKind::Event, &candidate, &stored));
  }

  #[test]
  fn non_numeric_text_in_numeric_field_falls_back_to_string_compare() {
    let cmp = Comparator::default();
    let stored = map(json!({ "odds_value": "EVEN" }));
    assert!(!cmp.has_changed(
      EntityKind::Participation,
      &map(json!({ "odds_value": " EVEN " })),
      &stored,
    ));
    assert!(cmp.has_changed(
      EntityKind::Participation,
      &map(json!({ "odds_value": -110 })),
      &stored,
    ));
  }

  #[test]
  fn timestamps_compare_as_instants() {
    let cmp = Comparator::default();
    let stored = map(json!({ "datetime_utc": "2025-03-01T23:00:00+00:00" }));
    assert!(!cmp.has_changed(
      EntityKind::Event,
      &map(json!({ "datetime_utc": "2025-03-01T23:00:00Z" })),
      &stored,
    ));
    assert!(!cmp.has_changed(
      EntityKind::Event,
      &map(json!({ "datetime_utc": "2025-03-01T18:00:00-05:00" })),
      &stored,
    ));
    assert!(!cmp.has_changed(
      EntityKind::Event,
      &map(json!({ "datetime_utc": "2025-03-01T23:00:00" })),
      &stored,
    ));
    assert!(cmp.has_changed(
      EntityKind::Event,
      &map(json!({ "datetime_utc": "2025-03-02T01:00:00Z" })),
      &stored,
    ));
  }
}
