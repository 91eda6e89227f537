//! SQL schema for the Ringside SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// Non-key attributes live in a JSON object column so the store never has
/// to know the field set of a kind.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS events (
    event_id    TEXT PRIMARY KEY,
    fields      TEXT NOT NULL DEFAULT '{}',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bouts (
    bout_id     TEXT PRIMARY KEY,
    fields      TEXT NOT NULL DEFAULT '{}',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS competitors (
    competitor_id TEXT PRIMARY KEY,
    fields        TEXT NOT NULL DEFAULT '{}',
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

-- A participation must never exist without its bout.
CREATE TABLE IF NOT EXISTS participations (
    bout_id       TEXT NOT NULL REFERENCES bouts(bout_id),
    competitor_id TEXT NOT NULL,
    fields        TEXT NOT NULL DEFAULT '{}',
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    PRIMARY KEY (bout_id, competitor_id)
);

CREATE INDEX IF NOT EXISTS participations_competitor_idx
    ON participations(competitor_id);

PRAGMA user_version = 1;
";
