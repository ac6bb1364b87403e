use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::{column_opt_ts, column_ts};
use crate::error::{Result, SchedulerError};
use crate::types::{FlowRun, RunStatus};

/// Thread-safe store of flow run records.
///
/// Shares the `Mutex<Connection>` with the flow registry. Every state
/// transition is a conditional UPDATE, so monotonicity (pending →
/// in_progress → success | failed) holds even when several sweeps race
/// over the same database.
pub struct RunLedger {
    db: Arc<Mutex<Connection>>,
}

impl RunLedger {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Ensure the flow has an open run, creating a pending one if needed.
    ///
    /// The new run is scheduled at `last_run_at + interval`, or at `now` for
    /// a flow that has never run. The insert is guarded by a NOT EXISTS on
    /// open (pending or in-progress) runs, so a flow never accumulates more
    /// than one open run no matter how often this is called. Returns the
    /// created run, or `None` when an open run already existed.
    #[instrument(skip(self))]
    pub fn create_pending_run(&self, flow_id: &str, now: DateTime<Utc>) -> Result<Option<FlowRun>> {
        let db = self.db.lock().unwrap();
        let (interval_secs, last_run_at) = match db.query_row(
            "SELECT run_interval_secs, last_run_at FROM data_flows WHERE id = ?1",
            rusqlite::params![flow_id],
            |row| Ok((row.get::<_, i64>(0)?, column_opt_ts(row, 1)?)),
        ) {
            Ok(pair) => pair,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(SchedulerError::FlowNotFound {
                    name: flow_id.to_string(),
                })
            }
            Err(e) => return Err(SchedulerError::Database(e)),
        };

        let interval = Duration::try_seconds(interval_secs).ok_or_else(|| {
            SchedulerError::InvalidFlow(format!("run_interval_secs out of range: {interval_secs}"))
        })?;
        let scheduled_at = match last_run_at {
            Some(t) => t + interval,
            None => now,
        };

        let id = Uuid::now_v7().to_string();
        let inserted = db.execute(
            "INSERT INTO flow_runs (id, flow_id, status, scheduled_at, created_at)
             SELECT ?1, ?2, 'pending', ?3, ?4
             WHERE NOT EXISTS (
                 SELECT 1 FROM flow_runs
                 WHERE flow_id = ?2 AND status IN ('pending', 'in_progress')
             )",
            rusqlite::params![id, flow_id, scheduled_at.to_rfc3339(), now.to_rfc3339()],
        )?;
        if inserted == 0 {
            debug!("flow already has an open run");
            return Ok(None);
        }

        let run = db.query_row(
            "SELECT id, flow_id, status, scheduled_at, started_at, ended_at,
                    error_message, error_trace, created_at
             FROM flow_runs WHERE id = ?1",
            rusqlite::params![id],
            row_to_run,
        )?;
        debug!(run_id = %run.id, scheduled_at = %run.scheduled_at, "pending run created");
        Ok(Some(run))
    }

    /// Pending runs of enabled flows whose `scheduled_at` has passed,
    /// ordered by (scheduled_at, id) for a deterministic sweep.
    ///
    /// Purely a read; calling it repeatedly without intervening transitions
    /// returns the same set.
    #[instrument(skip(self))]
    pub fn due_runs(&self, now: DateTime<Utc>) -> Result<Vec<FlowRun>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT r.id, r.flow_id, r.status, r.scheduled_at, r.started_at, r.ended_at,
                    r.error_message, r.error_trace, r.created_at
             FROM flow_runs r
             JOIN data_flows f ON f.id = r.flow_id
             WHERE r.status = 'pending' AND r.scheduled_at <= ?1 AND f.enabled = 1
             ORDER BY r.scheduled_at, r.id",
        )?;
        let rows = stmt.query_map(rusqlite::params![now.to_rfc3339()], row_to_run)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Atomically claim a pending run for execution.
    ///
    /// Returns `false` when the run was no longer pending, meaning another
    /// executor claimed it first. Callers treat that as "skip", not failure.
    #[instrument(skip(self))]
    pub fn claim_run(&self, run_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "UPDATE flow_runs SET status = 'in_progress', started_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            rusqlite::params![at.to_rfc3339(), run_id],
        )?;
        Ok(rows_changed == 1)
    }

    /// Transition an in-progress run to success.
    #[instrument(skip(self))]
    pub fn mark_run_succeeded(&self, run_id: &str, ended_at: DateTime<Utc>) -> Result<FlowRun> {
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "UPDATE flow_runs SET status = 'success', ended_at = ?1
             WHERE id = ?2 AND status = 'in_progress'",
            rusqlite::params![ended_at.to_rfc3339(), run_id],
        )?;
        if rows_changed == 0 {
            return Err(transition_conflict(&db, run_id));
        }
        Ok(fetch_run(&db, run_id)?)
    }

    /// Transition an in-progress run to failed, recording the error message
    /// and the full cause chain.
    #[instrument(skip(self, message, trace))]
    pub fn mark_run_failed(
        &self,
        run_id: &str,
        ended_at: DateTime<Utc>,
        message: &str,
        trace: Option<&str>,
    ) -> Result<FlowRun> {
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "UPDATE flow_runs SET status = 'failed', ended_at = ?1,
                    error_message = ?2, error_trace = ?3
             WHERE id = ?4 AND status = 'in_progress'",
            rusqlite::params![ended_at.to_rfc3339(), message, trace, run_id],
        )?;
        if rows_changed == 0 {
            return Err(transition_conflict(&db, run_id));
        }
        Ok(fetch_run(&db, run_id)?)
    }

    /// Retrieve a run by id, returning `None` if it does not exist.
    pub fn get_run(&self, run_id: &str) -> Result<Option<FlowRun>> {
        let db = self.db.lock().unwrap();
        match fetch_run(&db, run_id) {
            Ok(run) => Ok(Some(run)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SchedulerError::Database(e)),
        }
    }

    /// The flow's open (pending or in-progress) run, if any. At most one
    /// exists at a time.
    pub fn open_run(&self, flow_id: &str) -> Result<Option<FlowRun>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, flow_id, status, scheduled_at, started_at, ended_at,
                    error_message, error_trace, created_at
             FROM flow_runs
             WHERE flow_id = ?1 AND status IN ('pending', 'in_progress')",
            rusqlite::params![flow_id],
            row_to_run,
        ) {
            Ok(run) => Ok(Some(run)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SchedulerError::Database(e)),
        }
    }

    /// Run history for a flow, newest first.
    pub fn runs_for_flow(&self, flow_id: &str, limit: usize) -> Result<Vec<FlowRun>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, flow_id, status, scheduled_at, started_at, ended_at,
                    error_message, error_trace, created_at
             FROM flow_runs
             WHERE flow_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![flow_id, limit as i64], row_to_run)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn fetch_run(db: &Connection, run_id: &str) -> rusqlite::Result<FlowRun> {
    db.query_row(
        "SELECT id, flow_id, status, scheduled_at, started_at, ended_at,
                error_message, error_trace, created_at
         FROM flow_runs WHERE id = ?1",
        rusqlite::params![run_id],
        row_to_run,
    )
}

/// Look up the current status so the transition error names it.
fn transition_conflict(db: &Connection, run_id: &str) -> SchedulerError {
    match db.query_row(
        "SELECT status FROM flow_runs WHERE id = ?1",
        rusqlite::params![run_id],
        |row| row.get::<_, String>(0),
    ) {
        Ok(status) => SchedulerError::InvalidTransition {
            id: run_id.to_string(),
            status,
        },
        Err(_) => SchedulerError::InvalidTransition {
            id: run_id.to_string(),
            status: "missing".to_string(),
        },
    }
}

/// Map a SQLite row to a `FlowRun`.
fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<FlowRun> {
    let status_raw: String = row.get(2)?;
    let status: RunStatus = status_raw.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown run status: {status_raw}").into(),
        )
    })?;

    Ok(FlowRun {
        id: row.get(0)?,
        flow_id: row.get(1)?,
        status,
        scheduled_at: column_ts(row, 3)?,
        started_at: column_opt_ts(row, 4)?,
        ended_at: column_opt_ts(row, 5)?,
        error_message: row.get(6)?,
        error_trace: row.get(7)?,
        created_at: column_ts(row, 8)?,
    })
}
