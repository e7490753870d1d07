//! Versioned schema for the offline store.
//!
//! Migrations are an ordered list of additive steps, gated by SQLite's
//! `user_version` pragma. A database created by an older build records the
//! version it reached; newer code replays only the steps beyond that point,
//! one transaction per step. Steps never drop or rewrite rows.
//!
//! Every collection table has the same shape: a primary key, the record
//! serialized as JSON, and the record's timestamp column (`stamp`) so scans
//! can filter on age without deserializing.

/// Migration steps, in order. Step `i` brings the database to version `i + 1`.
pub const MIGRATIONS: &[&str] = &[
  // v1: the three collections.
  r#"
-- Pending uploads and outgoing chat messages awaiting server acknowledgement
CREATE TABLE IF NOT EXISTS pending_items (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    stamp TEXT NOT NULL
);

-- Read-through cache of remote documents
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    stamp TEXT NOT NULL
);

-- Cached chat history, same lifecycle as documents
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    stamp TEXT NOT NULL
);
"#,
  // v2: eviction scans filter on the timestamp column.
  r#"
CREATE INDEX IF NOT EXISTS idx_documents_stamp ON documents(stamp);
CREATE INDEX IF NOT EXISTS idx_messages_stamp ON messages(stamp);
"#,
];

/// Schema version the current build expects.
pub const CURRENT_VERSION: i64 = MIGRATIONS.len() as i64;
