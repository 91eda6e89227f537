//! Entity kinds, identity keys, and per-field classification.
//!
//! Every record the pipeline sees belongs to one of four [`EntityKind`]s and
//! is addressed in the store by an [`EntityKey`]. Field values travel as JSON
//! in a [`FieldMap`]; how two values of the same field are compared is decided
//! by the field's static [`FieldClass`].

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};

/// An ordered mapping of field name to JSON value. A JSON `null` is the
/// "present but unknown" state; an absent key means the field was not
/// observed at all.
pub type FieldMap = serde_json::Map<String, serde_json::Value>;

// ─── Kinds ───────────────────────────────────────────────────────────────────

/// The four entity kinds reconciled by the pipeline.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumIter,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
  Event,
  Bout,
  Competitor,
  Participation,
}

impl EntityKind {
  /// Write order for batched flushes: every kind comes after the kinds it
  /// references.
  pub const FLUSH_ORDER: [EntityKind; 4] = [
    EntityKind::Event,
    EntityKind::Competitor,
    EntityKind::Bout,
    EntityKind::Participation,
  ];

  /// Names of the identity columns, in key order.
  pub fn key_fields(self) -> &'static [&'static str] {
    match self {
      Self::Event => &["event_id"],
      Self::Bout => &["bout_id"],
      Self::Competitor => &["competitor_id"],
      Self::Participation => &["bout_id", "competitor_id"],
    }
  }

  /// The static field set for this kind, excluding identity columns.
  pub fn fields(self) -> &'static [FieldSpec] {
    match self {
      Self::Event => EVENT_FIELDS,
      Self::Bout => BOUT_FIELDS,
      Self::Competitor => COMPETITOR_FIELDS,
      Self::Participation => PARTICIPATION_FIELDS,
    }
  }

  pub fn spec(self, name: &str) -> Option<&'static FieldSpec> {
    self.fields().iter().find(|spec| spec.name == name)
  }

  /// Classification used by the comparator. Unknown fields compare as plain
  /// scalars.
  pub fn classify(self, name: &str) -> FieldClass {
    self.spec(name).map_or(FieldClass::Scalar, |spec| spec.class)
  }

  pub fn is_sticky(self, name: &str) -> bool {
    self.spec(name).is_some_and(|spec| spec.sticky)
  }
}

// ─── Field classification ────────────────────────────────────────────────────

/// How the comparator decides whether a field has changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
  /// Opaque structured value (e.g. a win-loss-draw breakdown); deep equality.
  Structured,
  /// Compared as numbers so that `"170"` and `170.0` are equal.
  Numeric,
  /// Compared as instants, whatever the offset notation.
  Timestamp,
  /// Compared as normalised strings.
  Scalar,
}

/// Static description of one non-key field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
  pub name:        &'static str,
  pub class:       FieldClass,
  /// A stored value is never overwritten by a placeholder candidate value.
  /// Protects results back-filled by a more authoritative pass.
  pub sticky:      bool,
  /// Token meaning "not known yet" for this field, e.g. `pending`.
  pub placeholder: Option<&'static str>,
}

impl FieldSpec {
  const fn new(name: &'static str, class: FieldClass) -> Self {
    Self { name, class, sticky: false, placeholder: None }
  }

  const fn scalar(name: &'static str) -> Self {
    Self::new(name, FieldClass::Scalar)
  }

  const fn numeric(name: &'static str) -> Self {
    Self::new(name, FieldClass::Numeric)
  }

  const fn structured(name: &'static str) -> Self {
    Self::new(name, FieldClass::Structured)
  }

  const fn timestamp(name: &'static str) -> Self {
    Self::new(name, FieldClass::Timestamp)
  }

  const fn sticky(self) -> Self { Self { sticky: true, ..self } }

  const fn placeholder(self, token: &'static str) -> Self {
    Self { placeholder: Some(token), ..self }
  }

  /// True for values that carry no information for this field: null, blank
  /// strings, empty containers, and the field's placeholder token.
  pub fn is_placeholder(&self, value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
      Value::Null => true,
      Value::String(s) => {
        let s = s.trim();
        s.is_empty() || self.placeholder.is_some_and(|p| s.eq_ignore_ascii_case(p))
      }
      Value::Array(items) => items.is_empty(),
      Value::Object(map) => map.is_empty(),
      Value::Bool(_) | Value::Number(_) => false,
    }
  }
}

const EVENT_FIELDS: &[FieldSpec] = &[
  FieldSpec::scalar("event_url"),
  FieldSpec::scalar("status"),
  FieldSpec::scalar("name"),
  FieldSpec::timestamp("datetime_utc"),
  FieldSpec::scalar("venue"),
  FieldSpec::scalar("location"),
];

const BOUT_FIELDS: &[FieldSpec] = &[
  FieldSpec::scalar("event_id"),
  FieldSpec::scalar("method_type"),
  FieldSpec::scalar("method_detail"),
  FieldSpec::scalar("round_summary"),
  FieldSpec::scalar("bout_type"),
  FieldSpec::numeric("weight_class_lbs"),
  FieldSpec::scalar("rounds_format"),
  FieldSpec::numeric("order"),
];

const COMPETITOR_FIELDS: &[FieldSpec] = &[
  FieldSpec::scalar("name"),
  FieldSpec::scalar("nickname"),
  FieldSpec::scalar("date_of_birth"),
  FieldSpec::scalar("born"),
  FieldSpec::scalar("fighting_out_of"),
  FieldSpec::numeric("height"),
  FieldSpec::numeric("reach"),
  FieldSpec::scalar("weight_class_name"),
  FieldSpec::scalar("style"),
  FieldSpec::scalar("country_code"),
  FieldSpec::structured("record"),
  FieldSpec::scalar("profile_url"),
  FieldSpec::scalar("image_url"),
];

const PARTICIPATION_FIELDS: &[FieldSpec] = &[
  FieldSpec::numeric("odds_value"),
  FieldSpec::scalar("odds_label"),
  FieldSpec::numeric("age_at_fight"),
  FieldSpec::scalar("result").sticky().placeholder("pending"),
  FieldSpec::structured("record_after").sticky(),
  FieldSpec::scalar("corner").sticky(),
];

// ─── Keys ────────────────────────────────────────────────────────────────────

/// The stable identity of an entity in the store.
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityKey {
  Event { event_id: String },
  Bout { bout_id: String },
  Competitor { competitor_id: String },
  Participation { bout_id: String, competitor_id: String },
}

impl EntityKey {
  pub fn event(event_id: impl Into<String>) -> Self {
    Self::Event { event_id: event_id.into() }
  }

  pub fn bout(bout_id: impl Into<String>) -> Self {
    Self::Bout { bout_id: bout_id.into() }
  }

  pub fn competitor(competitor_id: impl Into<String>) -> Self {
    Self::Competitor { competitor_id: competitor_id.into() }
  }

  pub fn participation(
    bout_id: impl Into<String>,
    competitor_id: impl Into<String>,
  ) -> Self {
    Self::Participation {
      bout_id:       bout_id.into(),
      competitor_id: competitor_id.into(),
    }
  }

  pub fn kind(&self) -> EntityKind {
    match self {
      Self::Event { .. } => EntityKind::Event,
      Self::Bout { .. } => EntityKind::Bout,
      Self::Competitor { .. } => EntityKind::Competitor,
      Self::Participation { .. } => EntityKind::Participation,
    }
  }

  /// `(column, value)` pairs in the order given by
  /// [`EntityKind::key_fields`].
  pub fn columns(&self) -> Vec<(&'static str, &str)> {
    match self {
      Self::Event { event_id } => vec![("event_id", event_id.as_str())],
      Self::Bout { bout_id } => vec![("bout_id", bout_id.as_str())],
      Self::Competitor { competitor_id } => {
        vec![("competitor_id", competitor_id.as_str())]
      }
      Self::Participation { bout_id, competitor_id } => vec![
        ("bout_id", bout_id.as_str()),
        ("competitor_id", competitor_id.as_str()),
      ],
    }
  }

  /// The bout a participation depends on.
  pub fn parent_bout(&self) -> Option<EntityKey> {
    match self {
      Self::Participation { bout_id, .. } => Some(Self::bout(bout_id.clone())),
      _ => None,
    }
  }

  /// Recover a key from the identity columns of a stored row.
  pub fn from_row(kind: EntityKind, row: &FieldMap) -> Option<Self> {
    let column = |name: &str| {
      row
        .get(name)
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_owned)
    };
    Some(match kind {
      EntityKind::Event => Self::event(column("event_id")?),
      EntityKind::Bout => Self::bout(column("bout_id")?),
      EntityKind::Competitor => Self::competitor(column("competitor_id")?),
      EntityKind::Participation => {
        Self::participation(column("bout_id")?, column("competitor_id")?)
      }
    })
  }
}

impl fmt::Display for EntityKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Event { event_id } => write!(f, "event:{event_id}"),
      Self::Bout { bout_id } => write!(f, "bout:{bout_id}"),
      Self::Competitor { competitor_id } => {
        write!(f, "competitor:{competitor_id}")
      }
      Self::Participation { bout_id, competitor_id } => {
        write!(f, "participation:{bout_id}/{competitor_id}")
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;
  use strum::IntoEnumIterator;

  use super::*;

  #[test]
  fn flush_order_covers_every_kind_once() {
    let mut ordered = EntityKind::FLUSH_ORDER.to_vec();
    ordered.sort();
    assert_eq!(ordered, EntityKind::iter().collect::<Vec<_>>());
  }

  #[test]
  fn participation_sorts_after_its_parents_in_flush_order() {
    let pos = |k| EntityKind::FLUSH_ORDER.iter().position(|x| *x == k);
    assert!(pos(EntityKind::Event) < pos(EntityKind::Bout));
    assert!(pos(EntityKind::Bout) < pos(EntityKind::Participation));
    assert!(pos(EntityKind::Competitor) < pos(EntityKind::Participation));
  }

  #[test]
  fn classification_and_stickiness() {
    assert_eq!(EntityKind::Competitor.classify("reach"), FieldClass::Numeric);
    assert_eq!(
      EntityKind::Participation.classify("record_after"),
      FieldClass::Structured
    );
    assert_eq!(EntityKind::Event.classify("datetime_utc"), FieldClass::Timestamp);
    assert_eq!(EntityKind::Event.classify("anything_else"), FieldClass::Scalar);
    assert!(EntityKind::Participation.is_sticky("result"));
    assert!(!EntityKind::Participation.is_sticky("odds_value"));
    assert!(!EntityKind::Bout.is_sticky("method_type"));
  }

  #[test]
  fn placeholders_per_field() {
    let result = EntityKind::Participation.spec("result").unwrap();
    assert!(result.is_placeholder(&json!("pending")));
    assert!(result.is_placeholder(&json!(" ")));
    assert!(!result.is_placeholder(&json!("win")));

    let record = EntityKind::Participation.spec("record_after").unwrap();
    assert!(record.is_placeholder(&json!({})));
    assert!(!record.is_placeholder(&json!({ "wins": 0, "losses": 0 })));
    assert!(!record.is_placeholder(&json!("pending")));
  }

  #[test]
  fn key_round_trips_through_row_columns() {
    let key = EntityKey::participation("B9", "C1");
    let mut row = FieldMap::new();
    for (column, value) in key.columns() {
      row.insert(column.into(), json!(value));
    }
    assert_eq!(EntityKey::from_row(EntityKind::Participation, &row), Some(key));
  }

  #[test]
  fn from_row_rejects_blank_identity() {
    let mut row = FieldMap::new();
    row.insert("bout_id".into(), json!("  "));
    assert_eq!(EntityKey::from_row(EntityKind::Bout, &row), None);
  }

  #[test]
  fn display_and_parent() {
    let key = EntityKey::participation("B9", "C2");
    assert_eq!(key.to_string(), "participation:B9/C2");
    assert_eq!(key.parent_bout(), Some(EntityKey::bout("B9")));
    assert_eq!(EntityKey::bout("B9").parent_bout(), None);
  }
}
