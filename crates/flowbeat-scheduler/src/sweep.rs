use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument};

use crate::error::{Result, SchedulerError};
use crate::executor::RunExecutor;
use crate::invoker::FlowInvoker;
use crate::ledger::RunLedger;
use crate::registry::FlowRegistry;
use crate::types::FlowRun;

/// Aggregate outcome of one sweep, serialised as the heartbeat response.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    /// Runs that were due when the sweep started.
    pub flows_due: usize,
    /// Runs the sweep attempted (succeeded + failed).
    pub flows_triggered: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Runs another executor claimed first, or whose flow vanished mid-sweep.
    pub skipped: usize,
    /// When the sweep finished.
    pub timestamp: DateTime<Utc>,
}

/// The periodic driver: seeds missing pending runs, then sweeps due ones.
///
/// Owns an executor over the shared registry and ledger. One instance is
/// shared by the ticker and the HTTP layer; all state lives in SQLite, so
/// concurrent sweeps are safe (claims arbitrate) if wasteful.
pub struct HeartbeatSweep {
    registry: Arc<FlowRegistry>,
    ledger: Arc<RunLedger>,
    executor: RunExecutor,
}

impl HeartbeatSweep {
    pub fn new(
        registry: Arc<FlowRegistry>,
        ledger: Arc<RunLedger>,
        invoker: Arc<FlowInvoker>,
    ) -> Self {
        let executor = RunExecutor::new(Arc::clone(&registry), Arc::clone(&ledger), invoker);
        Self {
            registry,
            ledger,
            executor,
        }
    }

    /// Seed a pending run for every due flow that has none outstanding.
    ///
    /// Covers the first-ever run of a new flow and heals chains that lost
    /// their next run (e.g. a crash between the terminal mark and the
    /// reschedule). Returns how many runs were seeded.
    #[instrument(skip(self))]
    pub fn ensure_scheduled(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut seeded = 0;
        for flow in self.registry.due_flows(now)? {
            if self.ledger.create_pending_run(&flow.id, now)?.is_some() {
                debug!(flow = %flow.name, "seeded pending run");
                seeded += 1;
            }
        }
        Ok(seeded)
    }

    /// Execute every run due at `now`, isolating failures per run.
    ///
    /// The due set is snapshotted up front; runs rescheduled while the sweep
    /// executes wait for the next one. Handler failures and lost claims are
    /// counted, never propagated; storage errors abort the sweep.
    #[instrument(skip(self))]
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let due = self.ledger.due_runs(now)?;
        let flows_due = due.len();
        let mut succeeded = 0;
        let mut failed = 0;
        let mut skipped = 0;

        for run in &due {
            match self.executor.execute(run).await {
                Ok(()) => succeeded += 1,
                Err(SchedulerError::RunClaimed { id }) => {
                    debug!(run_id = %id, "run claimed elsewhere, skipping");
                    skipped += 1;
                }
                Err(SchedulerError::FlowNotFound { name }) => {
                    debug!(run_id = %run.id, flow = %name, "flow vanished mid-sweep, skipping");
                    skipped += 1;
                }
                Err(e @ SchedulerError::Execution { .. })
                | Err(e @ SchedulerError::HandlerNotFound { .. }) => {
                    error!(run_id = %run.id, error = %e, "flow run failed");
                    failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let report = SweepReport {
            flows_due,
            flows_triggered: succeeded + failed,
            succeeded,
            failed,
            skipped,
            timestamp: Utc::now(),
        };
        info!(
            flows_due = report.flows_due,
            flows_triggered = report.flows_triggered,
            failed = report.failed,
            skipped = report.skipped,
            "sweep complete"
        );
        Ok(report)
    }

    /// Run a flow by name right now, regardless of its schedule.
    ///
    /// Reuses the flow's open run if one exists, seeding one otherwise, and
    /// executes it immediately. Handler failures are reported through the
    /// returned terminal run record, not as errors; a run that is already
    /// in progress surfaces as `RunClaimed`.
    #[instrument(skip(self))]
    pub async fn trigger_flow(&self, name: &str, now: DateTime<Utc>) -> Result<FlowRun> {
        let flow = self
            .registry
            .get_flow(name)?
            .ok_or_else(|| SchedulerError::FlowNotFound {
                name: name.to_string(),
            })?;

        let run = match self.ledger.open_run(&flow.id)? {
            Some(run) => run,
            None => match self.ledger.create_pending_run(&flow.id, now)? {
                Some(run) => run,
                // Lost a race against a concurrent seed; pick up whatever won.
                None => {
                    self.ledger
                        .open_run(&flow.id)?
                        .ok_or_else(|| SchedulerError::RunClaimed {
                            id: flow.id.clone(),
                        })?
                }
            },
        };

        match self.executor.execute(&run).await {
            Ok(()) => {}
            Err(SchedulerError::Execution { .. }) | Err(SchedulerError::HandlerNotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        self.ledger
            .get_run(&run.id)?
            .ok_or_else(|| SchedulerError::FlowNotFound {
                name: name.to_string(),
            })
    }
}
