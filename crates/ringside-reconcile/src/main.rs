//! `ringside`: reconcile harvested fight records into the store.
//!
//! Reads one JSON record per line (from `--input`, or stdin when it is `-`),
//! reconciles them against the SQLite store named in `ringside.toml` (or the
//! path given with `--config`), and prints the run summary.
//!
//! ```text
//! ringside --config ringside.toml --input records.jsonl
//! ```

use std::{
  io::BufRead,
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use ringside_core::{Candidate, store::RecordStore};
use ringside_reconcile::{Pipeline, ReconcileConfig, Reconciler, Signal};
use ringside_store_sqlite::SqliteStore;
use tokio::{
  io::{AsyncBufReadExt, BufReader},
  sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Ringside record reconciler")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "ringside.toml")]
  config: PathBuf,

  /// JSON-lines file of records; `-` reads stdin.
  #[arg(short, long, default_value = "-")]
  input: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let config = ReconcileConfig::load(&cli.config)
    .with_context(|| format!("failed to load config from {:?}", cli.config))?;

  let store_path = expand_tilde(&config.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
  let reconciler =
    Arc::new(Reconciler::new(Arc::new(store), &config).with_signals(signal_tx));
  let pipeline = Pipeline::new(reconciler, config);

  // Nothing consumes enrichment signals in-process yet; surface them.
  let signals = tokio::spawn(async move {
    while let Some(Signal::NeedsEnrichment { competitor_id, profile_url }) =
      signal_rx.recv().await
    {
      tracing::info!(%competitor_id, %profile_url, "competitor needs enrichment");
    }
  });

  let cancel = CancellationToken::new();
  tokio::spawn({
    let cancel = cancel.clone();
    async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("interrupt received; finishing up");
        cancel.cancel();
      }
    }
  });

  let (tx, rx) = pipeline.channel();
  let lines = read_lines(&cli.input)
    .await
    .with_context(|| format!("failed to open {}", cli.input))?;
  let feeder = tokio::spawn(feed(
    lines,
    tx,
    Arc::clone(pipeline.reconciler()),
    cancel.clone(),
  ));

  let outcome = pipeline.run(rx, cancel.clone()).await;
  // Intake is over either way; stop a feeder still waiting on input.
  cancel.cancel();
  if let Err(error) = feeder.await.context("input reader panicked")? {
    tracing::error!(error = %format!("{error:#}"), "input reader failed");
  }
  let summary = outcome.context("run aborted")?;

  // The reconciler holds the last signal sender.
  drop(pipeline);
  signals.await.ok();

  println!("{summary}");
  Ok(())
}

type Lines = mpsc::Receiver<std::io::Result<String>>;

/// Lines of `input`, or of stdin when it is `-`.
///
/// A blocking stdin read cannot be cancelled and would keep the runtime from
/// shutting down, so stdin is read on a plain thread that is left behind at
/// exit.
async fn read_lines(input: &str) -> std::io::Result<Lines> {
  let (tx, rx) = mpsc::channel(64);
  if input == "-" {
    std::thread::spawn(move || {
      for line in std::io::stdin().lock().lines() {
        if tx.blocking_send(line).is_err() {
          break;
        }
      }
    });
  } else {
    let file = tokio::fs::File::open(input).await?;
    tokio::spawn(async move {
      let mut lines = BufReader::new(file).lines();
      loop {
        let line = lines.next_line().await.transpose();
        let Some(line) = line else { break };
        if tx.send(line).await.is_err() {
          break;
        }
      }
    });
  }
  Ok(rx)
}

/// Send every decodable line to the pipeline until the input ends, the
/// pipeline stops taking records, or `cancel` fires. Undecodable lines are
/// counted in the run summary.
async fn feed<S: RecordStore>(
  mut lines: Lines,
  tx: mpsc::Sender<Candidate>,
  reconciler: Arc<Reconciler<S>>,
  cancel: CancellationToken,
) -> anyhow::Result<()> {
  let mut line_no = 0usize;
  loop {
    let next = tokio::select! {
      () = cancel.cancelled() => break,
      next = lines.recv() => next,
    };
    let Some(line) = next.transpose().context("failed to read input")? else {
      break;
    };
    line_no += 1;
    if line.trim().is_empty() {
      continue;
    }
    let Some(candidate) = reconciler.decode(line_no, &line) else {
      continue;
    };
    if tx.send(candidate).await.is_err() {
      // The pipeline stopped intake.
      break;
    }
  }
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;

  async fn reconciler() -> Arc<Reconciler<SqliteStore>> {
    let store = SqliteStore::open_in_memory().await.unwrap();
    Arc::new(Reconciler::new(Arc::new(store), &ReconcileConfig::default()))
  }

  #[tokio::test]
  async fn undecodable_lines_are_counted_in_the_summary() {
    let reconciler = reconciler().await;
    let (line_tx, lines) = mpsc::channel(8);
    for line in [
      r#"{"item_type":"event","event_id":"E1","name":"Fight Night"}"#,
      "not json",
      "",
      r#"{"item_type":"fight","fight_id":"B1","weight_class_lbs":"heavy"}"#,
    ] {
      line_tx.send(Ok(line.to_owned())).await.unwrap();
    }
    drop(line_tx);

    let (tx, mut rx) = mpsc::channel(8);
    feed(lines, tx, Arc::clone(&reconciler), CancellationToken::new())
      .await
      .unwrap();

    assert!(matches!(rx.recv().await, Some(Candidate::Event(_))));
    assert!(rx.recv().await.is_none());
    let summary = reconciler.summary();
    assert_eq!(summary.undecodable, 2);
    assert!(!summary.is_clean());
  }

  #[tokio::test]
  async fn cancel_stops_a_feeder_waiting_on_input() {
    let reconciler = reconciler().await;
    // The sender stays alive, so input never ends on its own.
    let (_line_tx, lines) = mpsc::channel::<std::io::Result<String>>(1);
    let (tx, _rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let feeder = tokio::spawn(feed(lines, tx, reconciler, cancel.clone()));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), feeder)
      .await
      .expect("feeder kept waiting after cancel")
      .unwrap()
      .unwrap();
  }
}
