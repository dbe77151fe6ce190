//! # Journal Schema
//!
//! Two tables make up the journal:
//!
//! ```text
//! {prefix}resources                      {prefix}events
//! ┌──────────────────────────┐           ┌─────────────────────────┐
//! │ namespace  ┐             │  AFTER    │ event_id (autoincrement)│
//! │ type       ├ primary key │  triggers │ namespace / type / id   │
//! │ id         ┘             │──────────►│ event_timestamp         │
//! │ version, created_at,     │           │ event_type (1/2/3)      │
//! │ updated_at, phase, owner │           │ spec_before, spec_after │
//! │ labels, finalizers, spec │           └─────────────────────────┘
//! └──────────────────────────┘
//! ```
//!
//! The triggers insert the event row inside the same transaction that
//! mutates the resource row, which is what makes the journal atomically
//! consistent with the resource table.
//!
//! The schema is idempotent (`IF NOT EXISTS` everywhere) and applied at
//! every startup. A configurable table prefix lets several independent
//! stores share one database file.
//!
//! Event row invariants:
//!
//! - `event_type = 1` (create): `spec_before` NULL, `spec_after` set
//! - `event_type = 2` (update): both set
//! - `event_type = 3` (delete): `spec_before` set, `spec_after` NULL

use rusqlite::Connection;

use crate::error::{Error, Result};

/// Full journal DDL with a `{p}` placeholder for the table prefix.
///
/// The resources table is WITHOUT ROWID: the identity triple IS the key,
/// there is no separate row id. The events table keeps SQLite's rowid as
/// `event_id` with AUTOINCREMENT, so ids are never reused even after
/// compaction deletes the largest ones.
const SCHEMA_TEMPLATE: &str = r#"
CREATE TABLE IF NOT EXISTS {p}resources (
    namespace  TEXT NOT NULL,
    type       TEXT NOT NULL,
    id         TEXT NOT NULL,
    version    INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    labels     BLOB,
    finalizers BLOB,
    phase      INTEGER NOT NULL,
    owner      TEXT NOT NULL,
    spec       BLOB NOT NULL,
    PRIMARY KEY (namespace, type, id)
) STRICT, WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS {p}events (
    event_id        INTEGER PRIMARY KEY AUTOINCREMENT,
    namespace       TEXT NOT NULL,
    type            TEXT NOT NULL,
    id              TEXT NOT NULL,
    event_timestamp INTEGER NOT NULL,
    event_type      INTEGER NOT NULL,
    spec_before     BLOB,
    spec_after      BLOB
) STRICT;

CREATE TRIGGER IF NOT EXISTS {p}resources_created
AFTER INSERT ON {p}resources
BEGIN
    INSERT INTO {p}events (namespace, type, id, event_timestamp, event_type, spec_before, spec_after)
    VALUES (NEW.namespace, NEW.type, NEW.id, unixepoch(), 1, NULL, NEW.spec);
END;

CREATE TRIGGER IF NOT EXISTS {p}resources_updated
AFTER UPDATE ON {p}resources
BEGIN
    INSERT INTO {p}events (namespace, type, id, event_timestamp, event_type, spec_before, spec_after)
    VALUES (NEW.namespace, NEW.type, NEW.id, unixepoch(), 2, OLD.spec, NEW.spec);
END;

CREATE TRIGGER IF NOT EXISTS {p}resources_destroyed
AFTER DELETE ON {p}resources
BEGIN
    INSERT INTO {p}events (namespace, type, id, event_timestamp, event_type, spec_before, spec_after)
    VALUES (OLD.namespace, OLD.type, OLD.id, unixepoch(), 3, OLD.spec, NULL);
END;
"#;

/// Renders the DDL for a table prefix.
pub(crate) fn schema_sql(prefix: &str) -> String {
    SCHEMA_TEMPLATE.replace("{p}", prefix)
}

/// Applies the schema, a no-op when it is already present.
pub(crate) fn migrate(conn: &Connection, prefix: &str) -> Result<()> {
    conn.execute_batch(&schema_sql(prefix))
        .map_err(|e| Error::Schema(format!("applying schema migration: {e}")))
}

// =============================================================================
// Tests
// =============================================================================
