use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `data_flows` and `flow_runs` tables (idempotent) plus the
/// indexes backing the two hot queries: due flows and due runs. Run rows
/// reference their flow with ON DELETE CASCADE, so deleting a flow also
/// removes its history; callers must enable `PRAGMA foreign_keys` on the
/// connection for the cascade to fire.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS data_flows (
            id                TEXT    NOT NULL PRIMARY KEY,
            name              TEXT    NOT NULL UNIQUE,
            run_interval_secs INTEGER NOT NULL,
            enabled           INTEGER NOT NULL DEFAULT 1,
            handler           TEXT    NOT NULL,
            params            TEXT    NOT NULL DEFAULT 'null',  -- opaque JSON payload
            last_run_at       TEXT,               -- RFC 3339 or NULL (never ran)
            last_run_status   TEXT,               -- 'success' | 'failed' | NULL
            created_at        TEXT    NOT NULL,
            updated_at        TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS flow_runs (
            id            TEXT NOT NULL PRIMARY KEY,
            flow_id       TEXT NOT NULL REFERENCES data_flows(id) ON DELETE CASCADE,
            status        TEXT NOT NULL DEFAULT 'pending',
            scheduled_at  TEXT NOT NULL,          -- RFC 3339
            started_at    TEXT,                   -- RFC 3339 or NULL
            ended_at      TEXT,                   -- RFC 3339 or NULL
            error_message TEXT,
            error_trace   TEXT,
            created_at    TEXT NOT NULL
        ) STRICT;

        -- Efficient sweeping: SELECT … WHERE status = 'pending' AND scheduled_at <= ?
        CREATE INDEX IF NOT EXISTS idx_flow_runs_due ON flow_runs (status, scheduled_at);

        -- Per-flow history listing, newest first.
        CREATE INDEX IF NOT EXISTS idx_flow_runs_flow ON flow_runs (flow_id, created_at DESC);
        ",
    )?;
    Ok(())
}

/// Read an RFC 3339 column as a UTC timestamp.
///
/// Malformed text surfaces as a rusqlite conversion error carrying the
/// column index, the same way a type mismatch would.
pub(crate) fn column_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw, idx)
}

/// Read a nullable RFC 3339 column as an optional UTC timestamp.
pub(crate) fn column_opt_ts(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_ts(&s, idx)).transpose()
}

fn parse_ts(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
