//! Record model: typed candidate records as handed over by extraction.
//!
//! A [`Candidate`] is one observation of an entity, possibly partial. Turning
//! it into a [`Record`] derives the identity key; a candidate without one is
//! rejected with [`Error::MissingKey`].

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
  Error, Result,
  entity::{EntityKey, EntityKind, FieldMap},
  store::Row,
};

// ─── Tri-state field ─────────────────────────────────────────────────────────

/// A non-key field as observed by extraction.
///
/// `Missing` and `Null` are kept apart so callers can tell "the source never
/// mentioned it" from "the source said null", but both mean *unknown* to the
/// reconciler: neither ever overwrites a stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Field<T> {
  #[default]
  Missing,
  Null,
  Set(T),
}

impl<T> Field<T> {
  pub fn is_missing(&self) -> bool { matches!(self, Self::Missing) }

  pub fn is_set(&self) -> bool { matches!(self, Self::Set(_)) }

  pub fn as_set(&self) -> Option<&T> {
    match self {
      Self::Set(value) => Some(value),
      _ => None,
    }
  }
}

impl<T> From<T> for Field<T> {
  fn from(value: T) -> Self { Self::Set(value) }
}

impl<T: Serialize> Serialize for Field<T> {
  fn serialize<S: Serializer>(
    &self,
    serializer: S,
  ) -> std::result::Result<S::Ok, S::Error> {
    match self {
      Self::Set(value) => value.serialize(serializer),
      Self::Missing | Self::Null => serializer.serialize_none(),
    }
  }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Field<T> {
  /// Only called when the key is present; absent keys fall back to
  /// `Default`, which is `Missing`.
  fn deserialize<D: Deserializer<'de>>(
    deserializer: D,
  ) -> std::result::Result<Self, D::Error> {
    Ok(match Option::<T>::deserialize(deserializer)? {
      Some(value) => Self::Set(value),
      None => Self::Null,
    })
  }
}

/// Listing pages hand over numbers and win-loss-draw records as text.
/// Accepts either the typed form or its text: blank text is `Null`, other
/// text goes through `FromStr`.
fn typed_or_text<'de, D, T>(
  deserializer: D,
) -> std::result::Result<Field<T>, D::Error>
where
  D: Deserializer<'de>,
  T: Deserialize<'de> + FromStr,
  T::Err: fmt::Display,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Loose<V> {
    Typed(V),
    Text(String),
  }

  Ok(match Option::<Loose<T>>::deserialize(deserializer)? {
    None => Field::Null,
    Some(Loose::Typed(value)) => Field::Set(value),
    Some(Loose::Text(text)) => match text.trim() {
      "" => Field::Null,
      text => Field::Set(text.parse().map_err(serde::de::Error::custom)?),
    },
  })
}

// ─── Value types ─────────────────────────────────────────────────────────────

/// Lifecycle status of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
  Upcoming,
  #[serde(alias = "In Progress")]
  Live,
  Completed,
  Cancelled,
  Postponed,
}

/// Outcome of a bout from one competitor's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoutResult {
  Win,
  Loss,
  Draw,
  NoContest,
  Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Corner {
  Red,
  Blue,
}

/// A win-loss-draw breakdown, stored as an opaque structured value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FightRecord {
  pub wins:   u32,
  pub losses: u32,
  #[serde(default)]
  pub draws:  u32,
}

impl FromStr for FightRecord {
  type Err = Error;

  /// Parses the `W-L-D` notation used on listing pages, e.g. `"10-1-0"`.
  /// The draw count is optional.
  fn from_str(s: &str) -> Result<Self> {
    let invalid = || Error::InvalidFightRecord(s.to_owned());
    let parts: Vec<&str> = s.trim().split('-').map(str::trim).collect();
    if !(2..=3).contains(&parts.len()) {
      return Err(invalid());
    }
    let num = |p: &str| p.parse::<u32>().map_err(|_| invalid());
    Ok(Self {
      wins:   num(parts[0])?,
      losses: num(parts[1])?,
      draws:  parts.get(2).copied().map(num).transpose()?.unwrap_or(0),
    })
  }
}

impl fmt::Display for FightRecord {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}-{}", self.wins, self.losses, self.draws)
  }
}

// ─── Candidate records ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
  pub event_id:     Option<String>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub event_url:    Field<String>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub status:       Field<EventStatus>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub name:         Field<String>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub datetime_utc: Field<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub venue:        Field<String>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub location:     Field<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Bout {
  #[serde(alias = "fight_id")]
  pub bout_id:          Option<String>,
  /// Parent event.
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub event_id:         Field<String>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub method_type:      Field<String>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub method_detail:    Field<String>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub round_summary:    Field<String>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub bout_type:        Field<String>,
  #[serde(
    deserialize_with = "typed_or_text",
    skip_serializing_if = "Field::is_missing"
  )]
  pub weight_class_lbs: Field<f64>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub rounds_format:    Field<String>,
  /// Position on the card; 1 is the opening bout.
  #[serde(
    alias = "fight_order",
    deserialize_with = "typed_or_text",
    skip_serializing_if = "Field::is_missing"
  )]
  pub order:            Field<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Competitor {
  #[serde(alias = "fighter_id")]
  pub competitor_id:     Option<String>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub name:              Field<String>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub nickname:          Field<String>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub date_of_birth:     Field<NaiveDate>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub born:              Field<String>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub fighting_out_of:   Field<String>,
  /// Centimetres.
  #[serde(
    deserialize_with = "typed_or_text",
    skip_serializing_if = "Field::is_missing"
  )]
  pub height:            Field<f64>,
  #[serde(
    deserialize_with = "typed_or_text",
    skip_serializing_if = "Field::is_missing"
  )]
  pub reach:             Field<f64>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub weight_class_name: Field<String>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub style:             Field<String>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub country_code:      Field<String>,
  #[serde(
    deserialize_with = "typed_or_text",
    skip_serializing_if = "Field::is_missing"
  )]
  pub record:            Field<FightRecord>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub profile_url:       Field<String>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub image_url:         Field<String>,
}

impl Competitor {
  /// True when none of the fields only a profile page provides are known.
  pub fn lacks_biography(&self) -> bool {
    !self.date_of_birth.is_set() && !self.height.is_set() && !self.reach.is_set()
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Participation {
  #[serde(alias = "fight_id")]
  pub bout_id:       Option<String>,
  #[serde(alias = "fighter_id")]
  pub competitor_id: Option<String>,
  /// American odds, e.g. `-350`.
  #[serde(
    deserialize_with = "typed_or_text",
    skip_serializing_if = "Field::is_missing"
  )]
  pub odds_value:    Field<i32>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub odds_label:    Field<String>,
  #[serde(
    deserialize_with = "typed_or_text",
    skip_serializing_if = "Field::is_missing"
  )]
  pub age_at_fight:  Field<u32>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub result:        Field<BoutResult>,
  #[serde(
    alias = "record_after_fight",
    deserialize_with = "typed_or_text",
    skip_serializing_if = "Field::is_missing"
  )]
  pub record_after:  Field<FightRecord>,
  #[serde(skip_serializing_if = "Field::is_missing")]
  pub corner:        Field<Corner>,
}

/// One observation of any entity kind, tagged by `item_type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "item_type", rename_all = "snake_case")]
pub enum Candidate {
  Event(Event),
  #[serde(alias = "fight")]
  Bout(Bout),
  #[serde(alias = "fighter")]
  Competitor(Competitor),
  Participation(Participation),
}

impl Candidate {
  pub fn kind(&self) -> EntityKind {
    match self {
      Self::Event(_) => EntityKind::Event,
      Self::Bout(_) => EntityKind::Bout,
      Self::Competitor(_) => EntityKind::Competitor,
      Self::Participation(_) => EntityKind::Participation,
    }
  }

  /// Derive the identity key. Blank identifiers count as missing.
  pub fn key(&self) -> Result<EntityKey> {
    let kind = self.kind();
    let required = |value: &Option<String>, field: &'static str| {
      value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .ok_or(Error::MissingKey { kind, field })
    };
    Ok(match self {
      Self::Event(e) => EntityKey::event(required(&e.event_id, "event_id")?),
      Self::Bout(b) => EntityKey::bout(required(&b.bout_id, "bout_id")?),
      Self::Competitor(c) => {
        EntityKey::competitor(required(&c.competitor_id, "competitor_id")?)
      }
      Self::Participation(p) => EntityKey::participation(
        required(&p.bout_id, "bout_id")?,
        required(&p.competitor_id, "competitor_id")?,
      ),
    })
  }

  fn to_object(&self) -> Result<FieldMap> {
    let value = match self {
      Self::Event(e) => serde_json::to_value(e)?,
      Self::Bout(b) => serde_json::to_value(b)?,
      Self::Competitor(c) => serde_json::to_value(c)?,
      Self::Participation(p) => serde_json::to_value(p)?,
    };
    match value {
      serde_json::Value::Object(map) => Ok(map),
      _ => Err(Error::NotAnObject(self.kind())),
    }
  }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// A candidate with a validated identity key.
#[derive(Debug, Clone)]
pub struct Record {
  key:       EntityKey,
  candidate: Candidate,
}

impl Record {
  pub fn new(candidate: Candidate) -> Result<Self> {
    let key = candidate.key()?;
    Ok(Self { key, candidate })
  }

  /// Parse and validate one JSON record as produced by extraction.
  pub fn from_json(value: serde_json::Value) -> Result<Self> {
    Self::new(serde_json::from_value(value)?)
  }

  pub fn kind(&self) -> EntityKind { self.candidate.kind() }

  pub fn key(&self) -> &EntityKey { &self.key }

  pub fn candidate(&self) -> &Candidate { &self.candidate }

  /// The bout this record must wait for, if any.
  pub fn parent_bout(&self) -> Option<EntityKey> { self.key.parent_bout() }

  /// Every observed non-key field in declaration order: `Null` fields map to
  /// JSON `null`, `Missing` fields are left out.
  pub fn fields(&self) -> Result<FieldMap> {
    let mut map = self.candidate.to_object()?;
    for column in self.kind().key_fields() {
      map.shift_remove(*column);
    }
    Ok(map)
  }

  /// The fields this record is allowed to write: only `Set` ones.
  pub fn assignments(&self) -> Result<FieldMap> {
    let mut map = self.fields()?;
    map.retain(|_, value| !value.is_null());
    Ok(map)
  }

  /// The insert payload: identity columns followed by the assignments.
  pub fn to_row(&self) -> Result<Row> {
    Ok(Row { key: self.key.clone(), fields: self.assignments()? })
  }
}

impl TryFrom<Candidate> for Record {
  type Error = Error;

  fn try_from(candidate: Candidate) -> Result<Self> { Self::new(candidate) }
}
