//! Reconciliation of harvested fight records against a [`RecordStore`].
//!
//! [`Reconciler`] decides per record whether to insert, update, skip, or
//! hold it until its parent bout exists. [`Pipeline`] feeds it from a channel
//! with one actor per entity kind and runs the shutdown path at the end.
//!
//! [`RecordStore`]: ringside_core::store::RecordStore

pub mod buffer;
pub mod compare;
pub mod config;
pub mod dedup;
pub mod error;
pub mod flusher;
pub mod gateway;
pub mod pipeline;
pub mod reconciler;
pub mod summary;

pub use config::{ReconcileConfig, WriteMode};
pub use error::{Error, Result};
pub use pipeline::Pipeline;
pub use reconciler::{Reconciler, Signal};
pub use summary::{DropReason, KindCounts, Outcome, RunSummary};
