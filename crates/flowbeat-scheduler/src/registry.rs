use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::db::{column_opt_ts, column_ts};
use crate::error::{Result, SchedulerError};
use crate::types::{DataFlow, FlowOutcome, NewFlow};

/// Thread-safe store of flow definitions.
///
/// The registry and the run ledger share a single SQLite connection guarded
/// by a `Mutex`. For high-concurrency deployments consider a connection pool
/// (e.g. r2d2), but a Mutex is sufficient for the single-node target.
pub struct FlowRegistry {
    db: Arc<Mutex<Connection>>,
}

impl FlowRegistry {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Persist a new flow definition and return the stored row.
    ///
    /// Validates the interval and rejects duplicate names. The flow starts
    /// with no run history; callers that want it picked up immediately seed
    /// its first pending run through the ledger.
    #[instrument(skip(self, flow), fields(name = %flow.name))]
    pub fn create_flow(&self, flow: &NewFlow) -> Result<DataFlow> {
        if flow.run_interval_secs <= 0 {
            return Err(SchedulerError::InvalidFlow(format!(
                "run_interval_secs must be positive, got {}",
                flow.run_interval_secs
            )));
        }
        if flow.name.trim().is_empty() {
            return Err(SchedulerError::InvalidFlow("name must not be empty".into()));
        }
        if flow.handler.trim().is_empty() {
            return Err(SchedulerError::InvalidFlow("handler must not be empty".into()));
        }

        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();

        let db = self.db.lock().unwrap();
        let inserted = db.execute(
            "INSERT OR IGNORE INTO data_flows
             (id, name, run_interval_secs, enabled, handler, params, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            rusqlite::params![
                id,
                flow.name,
                flow.run_interval_secs,
                flow.enabled,
                flow.handler,
                flow.params.to_string(),
                now
            ],
        )?;
        if inserted == 0 {
            return Err(SchedulerError::InvalidFlow(format!(
                "flow '{}' already exists",
                flow.name
            )));
        }

        let created = db.query_row(
            "SELECT id, name, run_interval_secs, enabled, handler, params,
                    last_run_at, last_run_status, created_at, updated_at
             FROM data_flows WHERE id = ?1",
            rusqlite::params![id],
            row_to_flow,
        )?;
        info!(interval_secs = flow.run_interval_secs, handler = %flow.handler, "flow created");
        Ok(created)
    }

    /// Retrieve a flow by name, returning `None` if it does not exist.
    pub fn get_flow(&self, name: &str) -> Result<Option<DataFlow>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, name, run_interval_secs, enabled, handler, params,
                    last_run_at, last_run_status, created_at, updated_at
             FROM data_flows WHERE name = ?1",
            rusqlite::params![name],
            row_to_flow,
        ) {
            Ok(flow) => Ok(Some(flow)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SchedulerError::Database(e)),
        }
    }

    /// Retrieve a flow by primary key, returning `None` if it does not exist.
    pub fn get_flow_by_id(&self, id: &str) -> Result<Option<DataFlow>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, name, run_interval_secs, enabled, handler, params,
                    last_run_at, last_run_status, created_at, updated_at
             FROM data_flows WHERE id = ?1",
            rusqlite::params![id],
            row_to_flow,
        ) {
            Ok(flow) => Ok(Some(flow)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SchedulerError::Database(e)),
        }
    }

    /// List every flow, ordered by name.
    pub fn list_flows(&self) -> Result<Vec<DataFlow>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, name, run_interval_secs, enabled, handler, params,
                    last_run_at, last_run_status, created_at, updated_at
             FROM data_flows
             ORDER BY name",
        )?;
        let rows = stmt.query_map([], row_to_flow)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Enabled flows whose interval has fully elapsed relative to `now`,
    /// plus enabled flows that have never run. Ordered by name.
    ///
    /// The comparison is inclusive: a flow whose interval elapsed exactly at
    /// `now` is due. Elapsed time is computed in whole seconds inside SQLite
    /// so the boundary does not drift with timestamp precision.
    #[instrument(skip(self))]
    pub fn due_flows(&self, now: DateTime<Utc>) -> Result<Vec<DataFlow>> {
        let now_s = now.to_rfc3339();
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, name, run_interval_secs, enabled, handler, params,
                    last_run_at, last_run_status, created_at, updated_at
             FROM data_flows
             WHERE enabled = 1
               AND (last_run_at IS NULL
                    OR CAST(strftime('%s', ?1) AS INTEGER)
                       - CAST(strftime('%s', last_run_at) AS INTEGER)
                       >= run_interval_secs)
             ORDER BY name",
        )?;
        let rows = stmt.query_map(rusqlite::params![now_s], row_to_flow)?;
        let due: Vec<DataFlow> = rows.filter_map(|r| r.ok()).collect();
        debug!(count = due.len(), "due flows");
        Ok(due)
    }

    /// Record that a run claimed this flow and is now executing.
    ///
    /// Sets `last_run_at` to the claim instant so the flow stops reading as
    /// due while the run is in flight. `last_run_status` keeps reflecting the
    /// previous finished run until this one ends.
    #[instrument(skip(self))]
    pub fn mark_run_started(&self, flow_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.touch(flow_id, at, None)
    }

    /// Record a successful run: `last_run_at` = end instant, status = success.
    #[instrument(skip(self))]
    pub fn mark_run_completed(&self, flow_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.touch(flow_id, at, Some(FlowOutcome::Success))
    }

    /// Record a failed run: `last_run_at` = end instant, status = failed.
    ///
    /// The error itself lives on the run row; here it is only logged.
    #[instrument(skip(self, error))]
    pub fn mark_run_failed(&self, flow_id: &str, at: DateTime<Utc>, error: &str) -> Result<()> {
        debug!(error = %error, "recording failed run on flow");
        self.touch(flow_id, at, Some(FlowOutcome::Failed))
    }

    /// Enable or disable a flow by name. Disabling never touches run history;
    /// already-persisted pending runs simply stop being swept.
    #[instrument(skip(self))]
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "UPDATE data_flows SET enabled = ?1, updated_at = ?2 WHERE name = ?3",
            rusqlite::params![enabled, now, name],
        )?;
        if rows_changed == 0 {
            return Err(SchedulerError::FlowNotFound {
                name: name.to_string(),
            });
        }
        info!("flow toggled");
        Ok(())
    }

    /// Permanently delete a flow. Its run history goes with it via the
    /// `ON DELETE CASCADE` on `flow_runs.flow_id`.
    #[instrument(skip(self))]
    pub fn delete_flow(&self, name: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "DELETE FROM data_flows WHERE name = ?1",
            rusqlite::params![name],
        )?;
        if rows_changed == 0 {
            return Err(SchedulerError::FlowNotFound {
                name: name.to_string(),
            });
        }
        info!("flow deleted");
        Ok(())
    }

    fn touch(&self, flow_id: &str, at: DateTime<Utc>, outcome: Option<FlowOutcome>) -> Result<()> {
        let at_s = at.to_rfc3339();
        let db = self.db.lock().unwrap();
        let rows_changed = match outcome {
            Some(outcome) => db.execute(
                "UPDATE data_flows
                 SET last_run_at = ?1, last_run_status = ?2, updated_at = ?1
                 WHERE id = ?3",
                rusqlite::params![at_s, outcome.to_string(), flow_id],
            )?,
            None => db.execute(
                "UPDATE data_flows SET last_run_at = ?1, updated_at = ?1 WHERE id = ?2",
                rusqlite::params![at_s, flow_id],
            )?,
        };
        if rows_changed == 0 {
            return Err(SchedulerError::FlowNotFound {
                name: flow_id.to_string(),
            });
        }
        Ok(())
    }
}

/// Map a SQLite row to a `DataFlow`.
fn row_to_flow(row: &rusqlite::Row<'_>) -> rusqlite::Result<DataFlow> {
    let params_raw: String = row.get(5)?;
    // Params were serialised by us; fall back to null rather than dropping the row.
    let params = serde_json::from_str(&params_raw).unwrap_or(serde_json::Value::Null);
    let status_raw: Option<String> = row.get(7)?;
    let last_run_status = status_raw.and_then(|s| s.parse().ok());

    Ok(DataFlow {
        id: row.get(0)?,
        name: row.get(1)?,
        run_interval_secs: row.get(2)?,
        enabled: row.get(3)?,
        handler: row.get(4)?,
        params,
        last_run_at: column_opt_ts(row, 6)?,
        last_run_status,
        created_at: column_ts(row, 8)?,
        updated_at: column_ts(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use chrono::Duration;

    fn registry() -> FlowRegistry {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        FlowRegistry::new(Arc::new(Mutex::new(conn)))
    }

    fn sample(name: &str, interval: i64) -> NewFlow {
        NewFlow {
            name: name.to_string(),
            run_interval_secs: interval,
            handler: "webhook".to_string(),
            params: serde_json::json!({"url": "http://localhost/hook"}),
            enabled: true,
        }
    }

    #[test]
    fn create_and_get_round_trip() {
        let registry = registry();
        let created = registry.create_flow(&sample("sync_inventory", 60)).unwrap();
        assert_eq!(created.run_interval_secs, 60);
        assert!(created.last_run_at.is_none());

        let fetched = registry.get_flow("sync_inventory").unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.params["url"], "http://localhost/hook");
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let registry = registry();
        registry.create_flow(&sample("sync_inventory", 60)).unwrap();
        let err = registry.create_flow(&sample("sync_inventory", 90)).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidFlow(_)));
    }

    #[test]
    fn nonpositive_interval_is_rejected() {
        let registry = registry();
        assert!(matches!(
            registry.create_flow(&sample("a", 0)),
            Err(SchedulerError::InvalidFlow(_))
        ));
        assert!(matches!(
            registry.create_flow(&sample("b", -5)),
            Err(SchedulerError::InvalidFlow(_))
        ));
    }

    #[test]
    fn never_run_flow_is_due() {
        let registry = registry();
        registry.create_flow(&sample("fresh", 3600)).unwrap();
        let due = registry.due_flows(Utc::now()).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "fresh");
    }

    #[test]
    fn due_boundary_is_inclusive() {
        let registry = registry();
        let flow = registry.create_flow(&sample("boundary", 60)).unwrap();
        let now = Utc::now();

        // Interval elapsed exactly: due.
        registry
            .mark_run_completed(&flow.id, now - Duration::seconds(60))
            .unwrap();
        assert_eq!(registry.due_flows(now).unwrap().len(), 1);

        // One second short: not due.
        registry
            .mark_run_completed(&flow.id, now - Duration::seconds(59))
            .unwrap();
        assert!(registry.due_flows(now).unwrap().is_empty());
    }

    #[test]
    fn disabled_flows_are_never_due() {
        let registry = registry();
        registry.create_flow(&sample("dormant", 60)).unwrap();
        registry.set_enabled("dormant", false).unwrap();
        assert!(registry.due_flows(Utc::now()).unwrap().is_empty());

        registry.set_enabled("dormant", true).unwrap();
        assert_eq!(registry.due_flows(Utc::now()).unwrap().len(), 1);
    }

    #[test]
    fn due_flows_are_ordered_by_name() {
        let registry = registry();
        registry.create_flow(&sample("beta", 60)).unwrap();
        registry.create_flow(&sample("alpha", 60)).unwrap();
        let names: Vec<String> = registry
            .due_flows(Utc::now())
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn started_flow_stops_being_due_until_interval_elapses() {
        let registry = registry();
        let flow = registry.create_flow(&sample("inflight", 60)).unwrap();
        let now = Utc::now();
        registry.mark_run_started(&flow.id, now).unwrap();

        assert!(registry.due_flows(now).unwrap().is_empty());
        let fetched = registry.get_flow("inflight").unwrap().unwrap();
        assert!(fetched.last_run_status.is_none());
    }

    #[test]
    fn terminal_marks_record_outcome() {
        let registry = registry();
        let flow = registry.create_flow(&sample("finishes", 60)).unwrap();
        let at = Utc::now();

        registry.mark_run_completed(&flow.id, at).unwrap();
        let fetched = registry.get_flow("finishes").unwrap().unwrap();
        assert_eq!(fetched.last_run_status, Some(FlowOutcome::Success));
        assert_eq!(fetched.last_run_at.unwrap(), at);

        registry.mark_run_failed(&flow.id, at, "boom").unwrap();
        let fetched = registry.get_flow("finishes").unwrap().unwrap();
        assert_eq!(fetched.last_run_status, Some(FlowOutcome::Failed));
    }

    #[test]
    fn marking_unknown_flow_errors() {
        let registry = registry();
        let err = registry.mark_run_started("no-such-id", Utc::now()).unwrap_err();
        assert!(matches!(err, SchedulerError::FlowNotFound { .. }));
    }

    #[test]
    fn delete_removes_flow() {
        let registry = registry();
        registry.create_flow(&sample("ephemeral", 60)).unwrap();
        registry.delete_flow("ephemeral").unwrap();
        assert!(registry.get_flow("ephemeral").unwrap().is_none());
        assert!(matches!(
            registry.delete_flow("ephemeral"),
            Err(SchedulerError::FlowNotFound { .. })
        ));
    }
}
