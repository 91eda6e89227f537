//! Core types and trait definitions for the Ringside reconciliation pipeline.
//!
//! This crate holds the typed record model and the store gateway trait. It
//! performs no I/O; the SQLite backend and the reconciler both depend on it.

// Native `async fn` in traits; the store trait spells out `Send` futures.
#![allow(async_fn_in_trait)]

pub mod entity;
pub mod error;
pub mod record;
pub mod store;

pub use entity::{EntityKey, EntityKind, FieldClass, FieldMap, FieldSpec};
pub use error::{Error, Result};
pub use record::{Candidate, Field, Record};
