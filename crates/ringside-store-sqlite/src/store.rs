//! [`SqliteStore`], the SQLite implementation of [`RecordStore`].

use std::{collections::HashMap, path::Path};

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use ringside_core::{
  EntityKey, EntityKind, FieldMap,
  store::{RecordStore, Row},
};

use crate::{
  Error, Result,
  encode::{
    RawRow, encode_dt, encode_fields, encode_key, insert_sql, merge_fields,
    select_sql, table, update_sql,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A record store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Number of stored rows of `kind`.
  pub async fn count(&self, kind: EntityKind) -> Result<usize> {
    let sql = format!("SELECT COUNT(*) FROM {}", table(kind));
    let n: i64 = self
      .conn
      .call(move |conn| Ok(conn.query_row(&sql, [], |r| r.get(0))?))
      .await?;
    Ok(n as usize)
  }
}

// ─── Statement helpers (run on the connection thread) ────────────────────────

fn select_raw(
  conn: &rusqlite::Connection,
  kind: EntityKind,
  key_values: &[String],
) -> rusqlite::Result<Option<RawRow>> {
  conn
    .prepare_cached(&select_sql(kind))?
    .query_row(rusqlite::params_from_iter(key_values), |row| {
      RawRow::from_sql(kind, row)
    })
    .optional()
}

fn insert_raw(
  conn: &rusqlite::Connection,
  kind: EntityKind,
  key_values: &[String],
  fields_json: String,
  now: &str,
) -> rusqlite::Result<()> {
  let mut params = key_values.to_vec();
  params.extend([fields_json, now.to_owned(), now.to_owned()]);
  conn
    .prepare_cached(&insert_sql(kind))?
    .execute(rusqlite::params_from_iter(params))?;
  Ok(())
}

fn update_raw(
  conn: &rusqlite::Connection,
  kind: EntityKind,
  key_values: &[String],
  fields_json: String,
  now: &str,
) -> rusqlite::Result<usize> {
  let mut params = key_values.to_vec();
  params.extend([fields_json, now.to_owned()]);
  conn
    .prepare_cached(&update_sql(kind))?
    .execute(rusqlite::params_from_iter(params))
}

fn json_err(e: serde_json::Error) -> tokio_rusqlite::Error {
  tokio_rusqlite::Error::Other(Box::new(e))
}

fn check_kind(expected: EntityKind, key: &EntityKey) -> Result<()> {
  if key.kind() == expected {
    Ok(())
  } else {
    Err(Error::KindMismatch { expected, found: key.clone() })
  }
}

// ─── RecordStore impl ────────────────────────────────────────────────────────

impl RecordStore for SqliteStore {
  type Error = Error;

  async fn get_by_key(&self, key: EntityKey) -> Result<Option<FieldMap>> {
    let kind = key.kind();
    let key_values = encode_key(&key);

    let raw: Option<RawRow> = self
      .conn
      .call(move |conn| Ok(select_raw(conn, kind, &key_values)?))
      .await?;

    raw.map(|r| r.into_field_map(kind)).transpose()
  }

  async fn get_many_by_keys(
    &self,
    kind: EntityKind,
    keys: Vec<EntityKey>,
  ) -> Result<HashMap<EntityKey, FieldMap>> {
    for key in &keys {
      check_kind(kind, key)?;
    }
    let encoded: Vec<Vec<String>> = keys.iter().map(encode_key).collect();

    let raws: Vec<RawRow> = self
      .conn
      .call(move |conn| {
        let mut found = Vec::with_capacity(encoded.len());
        for key_values in &encoded {
          if let Some(raw) = select_raw(conn, kind, key_values)? {
            found.push(raw);
          }
        }
        Ok(found)
      })
      .await?;

    let mut rows = HashMap::with_capacity(raws.len());
    for raw in raws {
      let map = raw.into_field_map(kind)?;
      if let Some(key) = EntityKey::from_row(kind, &map) {
        rows.insert(key, map);
      }
    }
    Ok(rows)
  }

  async fn insert(&self, row: Row) -> Result<()> {
    let kind        = row.kind();
    let key_values  = encode_key(&row.key);
    let fields_json = encode_fields(&row.fields)?;
    let now         = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        insert_raw(conn, kind, &key_values, fields_json, &now)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn update(&self, key: EntityKey, fields: FieldMap) -> Result<()> {
    let kind       = key.kind();
    let key_values = encode_key(&key);
    let now        = encode_dt(Utc::now());

    let found: bool = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let Some(raw) = select_raw(&tx, kind, &key_values)? else {
          return Ok(false);
        };
        let merged = merge_fields(&raw.fields, &fields).map_err(json_err)?;
        update_raw(&tx, kind, &key_values, merged, &now)?;
        tx.commit()?;
        Ok(true)
      })
      .await?;

    if found { Ok(()) } else { Err(Error::NotFound(key)) }
  }

  async fn batch_upsert(&self, kind: EntityKind, rows: Vec<Row>) -> Result<()> {
    if rows.is_empty() {
      return Ok(());
    }
    for row in &rows {
      check_kind(kind, &row.key)?;
    }
    let count = rows.len();
    let encoded: Vec<(Vec<String>, FieldMap)> = rows
      .into_iter()
      .map(|row| (encode_key(&row.key), row.fields))
      .collect();
    let now = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for (key_values, fields) in &encoded {
          match select_raw(&tx, kind, key_values)? {
            Some(raw) => {
              let merged = merge_fields(&raw.fields, fields).map_err(json_err)?;
              update_raw(&tx, kind, key_values, merged, &now)?;
            }
            None => {
              let fields_json = encode_fields(fields).map_err(json_err)?;
              insert_raw(&tx, kind, key_values, fields_json, &now)?;
            }
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;

    tracing::debug!(%kind, rows = count, "batch upsert committed");
    Ok(())
  }
}
