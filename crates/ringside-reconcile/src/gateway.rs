//! Guarded access to a [`RecordStore`].
//!
//! Every call runs under the configured timeout, store errors are boxed into
//! [`Error::Store`], and the gateway keeps a count of consecutive failures so
//! the pipeline can tell a flaky row from an unreachable store.

use std::{
  collections::HashMap,
  fmt,
  future::Future,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use ringside_core::{
  EntityKey, EntityKind, FieldMap,
  store::{RecordStore, Row},
};
use strum::Display;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Op {
  GetByKey,
  GetManyByKeys,
  Insert,
  Update,
  BatchUpsert,
}

pub struct Gateway<S> {
  store:                Arc<S>,
  timeout:              Duration,
  consecutive_failures: AtomicUsize,
  reads:                AtomicUsize,
  writes:               AtomicUsize,
}

impl<S: RecordStore> Gateway<S> {
  pub fn new(store: Arc<S>, timeout: Duration) -> Self {
    Self {
      store,
      timeout,
      consecutive_failures: AtomicUsize::new(0),
      reads: AtomicUsize::new(0),
      writes: AtomicUsize::new(0),
    }
  }

  pub fn store(&self) -> &S { &self.store }

  /// Failed calls since the last successful one.
  pub fn consecutive_failures(&self) -> usize {
    self.consecutive_failures.load(Ordering::Relaxed)
  }

  /// Read calls issued so far, successful or not.
  pub fn reads(&self) -> usize { self.reads.load(Ordering::Relaxed) }

  /// Write calls issued so far, successful or not.
  pub fn writes(&self) -> usize { self.writes.load(Ordering::Relaxed) }

  async fn call<T>(
    &self,
    op: Op,
    target: impl fmt::Display,
    fut: impl Future<Output = Result<T, S::Error>>,
  ) -> Result<T> {
    let counter = match op {
      Op::GetByKey | Op::GetManyByKeys => &self.reads,
      Op::Insert | Op::Update | Op::BatchUpsert => &self.writes,
    };
    counter.fetch_add(1, Ordering::Relaxed);

    let result = match tokio::time::timeout(self.timeout, fut).await {
      Ok(Ok(value)) => Ok(value),
      Ok(Err(e)) => Err(Error::Store {
        op,
        target: target.to_string(),
        source: Box::new(e),
      }),
      Err(_) => Err(Error::Timeout {
        op,
        target: target.to_string(),
        after: self.timeout,
      }),
    };

    match &result {
      Ok(_) => self.consecutive_failures.store(0, Ordering::Relaxed),
      Err(_) => {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
      }
    }
    result
  }

  pub async fn get_by_key(&self, key: &EntityKey) -> Result<Option<FieldMap>> {
    self
      .call(Op::GetByKey, key, self.store.get_by_key(key.clone()))
      .await
  }

  pub async fn get_many_by_keys(
    &self,
    kind: EntityKind,
    keys: Vec<EntityKey>,
  ) -> Result<HashMap<EntityKey, FieldMap>> {
    let target = format!("{} {kind} keys", keys.len());
    self
      .call(Op::GetManyByKeys, target, self.store.get_many_by_keys(kind, keys))
      .await
  }

  pub async fn insert(&self, row: Row) -> Result<()> {
    let target = row.key.to_string();
    self.call(Op::Insert, target, self.store.insert(row)).await
  }

  pub async fn update(&self, key: &EntityKey, fields: FieldMap) -> Result<()> {
    self
      .call(Op::Update, key, self.store.update(key.clone(), fields))
      .await
  }

  pub async fn batch_upsert(&self, kind: EntityKind, rows: Vec<Row>) -> Result<()> {
    let target = format!("{} {kind} rows", rows.len());
    self
      .call(Op::BatchUpsert, target, self.store.batch_upsert(kind, rows))
      .await
  }
}
