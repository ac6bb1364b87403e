use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::error::{Result, SchedulerError};
use crate::invoker::FlowInvoker;
use crate::ledger::RunLedger;
use crate::registry::FlowRegistry;
use crate::types::{DataFlow, FlowRun};

/// Drives one run through its lifecycle: claim, invoke, record, reschedule.
///
/// The contract is record-before-propagate: by the time `execute` returns a
/// handler error, the run row is already failed and the flow bookkeeping
/// already reflects the outcome. Callers never observe an error for state
/// that was not persisted first.
pub struct RunExecutor {
    registry: Arc<FlowRegistry>,
    ledger: Arc<RunLedger>,
    invoker: Arc<FlowInvoker>,
}

impl RunExecutor {
    pub fn new(
        registry: Arc<FlowRegistry>,
        ledger: Arc<RunLedger>,
        invoker: Arc<FlowInvoker>,
    ) -> Self {
        Self {
            registry,
            ledger,
            invoker,
        }
    }

    /// Execute a single due run.
    ///
    /// Claims the run first; a lost claim returns `RunClaimed` and touches
    /// nothing. After a won claim the run always reaches a terminal state
    /// and the flow's next occurrence is placed on the timeline, whether
    /// the handler succeeded or not.
    #[instrument(skip(self, run), fields(run_id = %run.id))]
    pub async fn execute(&self, run: &FlowRun) -> Result<()> {
        let flow = self
            .registry
            .get_flow_by_id(&run.flow_id)?
            .ok_or_else(|| SchedulerError::FlowNotFound {
                name: run.flow_id.clone(),
            })?;

        let started_at = Utc::now();
        if !self.ledger.claim_run(&run.id, started_at)? {
            return Err(SchedulerError::RunClaimed { id: run.id.clone() });
        }
        self.registry.mark_run_started(&flow.id, started_at)?;
        info!(flow = %flow.name, "run started");

        let handler = match self.invoker.resolve(&flow) {
            Ok(handler) => handler,
            Err(e) => {
                self.record_failure(&flow, run, &e.to_string(), None)?;
                return Err(e);
            }
        };

        match self.invoker.invoke(handler.as_ref(), &flow).await {
            Ok(()) => {
                let ended_at = Utc::now();
                self.ledger.mark_run_succeeded(&run.id, ended_at)?;
                self.registry.mark_run_completed(&flow.id, ended_at)?;
                self.ledger.create_pending_run(&flow.id, ended_at)?;
                info!(flow = %flow.name, "run succeeded");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                let trace = error_chain(e.as_ref());
                self.record_failure(&flow, run, &message, Some(&trace))?;
                Err(SchedulerError::Execution {
                    flow: flow.name.clone(),
                    message,
                })
            }
        }
    }

    /// Persist a failed outcome and put the next occurrence on the timeline.
    fn record_failure(
        &self,
        flow: &DataFlow,
        run: &FlowRun,
        message: &str,
        trace: Option<&str>,
    ) -> Result<()> {
        let ended_at = Utc::now();
        self.ledger.mark_run_failed(&run.id, ended_at, message, trace)?;
        self.registry.mark_run_failed(&flow.id, ended_at, message)?;
        self.ledger.create_pending_run(&flow.id, ended_at)?;
        warn!(flow = %flow.name, error = %message, "run failed");
        Ok(())
    }
}

/// Render an error and its `source()` chain, one cause per line.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str("\ncaused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::invoker::{FlowHandler, HandlerError, HandlerRegistry};
    use crate::types::{FlowOutcome, NewFlow, RunStatus};
    use async_trait::async_trait;
    use rusqlite::Connection;
    use std::sync::Mutex;

    struct Stub {
        name: &'static str,
        fail_with: Option<&'static str>,
    }

    #[async_trait]
    impl FlowHandler for Stub {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, _params: &serde_json::Value) -> std::result::Result<(), HandlerError> {
            match self.fail_with {
                Some(message) => Err(message.into()),
                None => Ok(()),
            }
        }
    }

    fn harness(handlers: HandlerRegistry) -> (Arc<FlowRegistry>, Arc<RunLedger>, RunExecutor) {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        let registry = Arc::new(FlowRegistry::new(Arc::clone(&db)));
        let ledger = Arc::new(RunLedger::new(db));
        let executor = RunExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            Arc::new(FlowInvoker::new(handlers)),
        );
        (registry, ledger, executor)
    }

    fn seed_flow(
        registry: &FlowRegistry,
        ledger: &RunLedger,
        name: &str,
        handler: &str,
    ) -> (String, FlowRun) {
        let flow = registry
            .create_flow(&NewFlow {
                name: name.to_string(),
                run_interval_secs: 60,
                handler: handler.to_string(),
                params: serde_json::Value::Null,
                enabled: true,
            })
            .unwrap();
        let run = ledger
            .create_pending_run(&flow.id, Utc::now())
            .unwrap()
            .unwrap();
        (flow.id, run)
    }

    #[tokio::test]
    async fn success_path_records_and_reschedules() {
        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(Stub {
            name: "ok",
            fail_with: None,
        }));
        let (registry, ledger, executor) = harness(handlers);
        let (flow_id, run) = seed_flow(&registry, &ledger, "steady", "ok");

        executor.execute(&run).await.unwrap();

        let done = ledger.get_run(&run.id).unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Success);
        assert!(done.ended_at.unwrap() >= done.started_at.unwrap());

        let flow = registry.get_flow("steady").unwrap().unwrap();
        assert_eq!(flow.last_run_status, Some(FlowOutcome::Success));
        assert_eq!(flow.last_run_at, done.ended_at);

        // Exactly one new pending run, one interval after the finish.
        let next = ledger.open_run(&flow_id).unwrap().unwrap();
        assert_eq!(next.status, RunStatus::Pending);
        assert_eq!(
            next.scheduled_at,
            done.ended_at.unwrap() + chrono::Duration::seconds(60)
        );
    }

    #[tokio::test]
    async fn failure_is_recorded_before_the_error_propagates() {
        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(Stub {
            name: "bad",
            fail_with: Some("boom"),
        }));
        let (registry, ledger, executor) = harness(handlers);
        let (flow_id, run) = seed_flow(&registry, &ledger, "fragile", "bad");

        let err = executor.execute(&run).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Execution { .. }));
        assert!(err.to_string().contains("boom"));

        let done = ledger.get_run(&run.id).unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Failed);
        assert_eq!(done.error_message.as_deref(), Some("boom"));
        assert!(done.error_trace.is_some());

        let flow = registry.get_flow("fragile").unwrap().unwrap();
        assert_eq!(flow.last_run_status, Some(FlowOutcome::Failed));

        // Failure still reschedules.
        assert!(ledger.open_run(&flow_id).unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_handler_fails_the_run() {
        let (registry, ledger, executor) = harness(HandlerRegistry::new());
        let (flow_id, run) = seed_flow(&registry, &ledger, "orphan", "ghost");

        let err = executor.execute(&run).await.unwrap_err();
        assert!(matches!(err, SchedulerError::HandlerNotFound { .. }));

        let done = ledger.get_run(&run.id).unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Failed);
        assert!(done.error_message.unwrap().contains("ghost"));
        assert!(ledger.open_run(&flow_id).unwrap().is_some());
    }

    #[tokio::test]
    async fn lost_claim_touches_nothing() {
        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(Stub {
            name: "ok",
            fail_with: None,
        }));
        let (registry, ledger, executor) = harness(handlers);
        let (_flow_id, run) = seed_flow(&registry, &ledger, "contended", "ok");

        ledger.claim_run(&run.id, Utc::now()).unwrap();
        let err = executor.execute(&run).await.unwrap_err();
        assert!(matches!(err, SchedulerError::RunClaimed { .. }));

        let current = ledger.get_run(&run.id).unwrap().unwrap();
        assert_eq!(current.status, RunStatus::InProgress);
        let flow = registry.get_flow("contended").unwrap().unwrap();
        assert!(flow.last_run_status.is_none());
    }
}
