//! Channel-driven run loop.
//!
//! A dispatcher reads candidates off a bounded channel, derives their keys,
//! and forwards each record to a partition actor for its kind. Kinds proceed
//! concurrently; within a kind, records are routed in arrival order.

use std::{collections::HashMap, future, sync::Arc};

use ringside_core::{Candidate, EntityKind, Record, store::RecordStore};
use strum::IntoEnumIterator;
use tokio::{sync::mpsc, task::JoinSet, time::Interval};
use tokio_util::sync::CancellationToken;

use crate::{
  Error, Result,
  config::ReconcileConfig,
  reconciler::Reconciler,
  summary::RunSummary,
};

pub struct Pipeline<S> {
  reconciler: Arc<Reconciler<S>>,
  config:     ReconcileConfig,
}

impl<S: RecordStore + 'static> Pipeline<S> {
  pub fn new(reconciler: Arc<Reconciler<S>>, config: ReconcileConfig) -> Self {
    Self { reconciler, config }
  }

  pub fn reconciler(&self) -> &Arc<Reconciler<S>> { &self.reconciler }

  /// A producer/consumer pair sized by `channel_capacity`.
  pub fn channel(&self) -> (mpsc::Sender<Candidate>, mpsc::Receiver<Candidate>) {
    mpsc::channel(self.config.channel_capacity.max(1))
  }

  /// Consume `input` until it closes or `cancel` fires, then run the
  /// shutdown path. Returns [`Error::GatewayUnavailable`] if the run was
  /// stopped because the store stopped answering; the shutdown path has
  /// still been attempted by then.
  pub async fn run(
    &self,
    mut input: mpsc::Receiver<Candidate>,
    cancel: CancellationToken,
  ) -> Result<RunSummary> {
    let unavailable = CancellationToken::new();
    let mut actors = JoinSet::new();
    let mut partitions = HashMap::new();
    for kind in EntityKind::iter() {
      let (tx, rx) = mpsc::channel::<Record>(self.config.channel_capacity.max(1));
      actors.spawn(partition(
        kind,
        Arc::clone(&self.reconciler),
        rx,
        unavailable.clone(),
      ));
      partitions.insert(kind, tx);
    }

    let mut ticker = self.config.flush_interval().map(|period| {
      let mut ticker = tokio::time::interval(period);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      ticker
    });
    let mut aborted_after = None;
    let mut received = 0usize;

    loop {
      tokio::select! {
        biased;
        () = cancel.cancelled() => {
          tracing::info!(received, "cancelled; stopping intake");
          break;
        }
        () = unavailable.cancelled() => {
          let consecutive_failures = self.reconciler.gateway().consecutive_failures();
          tracing::error!(consecutive_failures, "store unavailable; stopping intake");
          aborted_after = Some(consecutive_failures);
          break;
        }
        () = tick(&mut ticker) => {
          let report = self.reconciler.flush().await;
          if report.rows() > 0 {
            tracing::debug!(rows = report.rows(), failed = report.failed(), "periodic flush");
          }
        }
        next = input.recv() => {
          let Some(candidate) = next else {
            tracing::debug!(received, "input closed");
            break;
          };
          received += 1;
          let Ok(record) = self.reconciler.prepare(candidate) else {
            continue;
          };
          let Some(tx) = partitions.get(&record.kind()) else {
            continue;
          };
          if tx.send(record).await.is_err() {
            tracing::error!("partition actor stopped early");
            break;
          }
        }
      }
    }

    // Closing the partitions lets each actor drain what it already accepted.
    drop(partitions);
    while let Some(joined) = actors.join_next().await {
      if let Err(error) = joined {
        tracing::error!(%error, "partition actor panicked");
      }
    }

    let summary = self.reconciler.shutdown().await;
    summary.log();

    match aborted_after {
      Some(consecutive_failures) => {
        Err(Error::GatewayUnavailable { consecutive_failures })
      }
      None => Ok(summary),
    }
  }
}

/// Route one kind's records in order. Trips `unavailable` when the store
/// has failed too many calls in a row, but keeps draining its queue.
async fn partition<S: RecordStore>(
  kind: EntityKind,
  reconciler: Arc<Reconciler<S>>,
  mut rx: mpsc::Receiver<Record>,
  unavailable: CancellationToken,
) {
  let mut routed = 0usize;
  while let Some(record) = rx.recv().await {
    reconciler.route(record).await;
    routed += 1;
    if reconciler.gateway_unavailable() {
      unavailable.cancel();
    }
  }
  tracing::debug!(%kind, routed, "partition drained");
}

async fn tick(ticker: &mut Option<Interval>) {
  match ticker {
    Some(ticker) => {
      ticker.tick().await;
    }
    None => future::pending().await,
  }
}
