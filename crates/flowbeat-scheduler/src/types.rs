use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a flow's most recent finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowOutcome {
    /// The handler returned without error.
    Success,
    /// The handler returned an error (or could not be resolved).
    Failed,
}

impl std::fmt::Display for FlowOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FlowOutcome::Success => "success",
            FlowOutcome::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FlowOutcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(FlowOutcome::Success),
            "failed" => Ok(FlowOutcome::Failed),
            other => Err(format!("unknown flow outcome: {other}")),
        }
    }
}

/// Lifecycle state of a single flow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Waiting for its scheduled_at time.
    Pending,
    /// Claimed by an executor and currently running.
    InProgress,
    /// Finished without error.
    Success,
    /// Finished with an error.
    Failed,
}

impl RunStatus {
    /// True once the run can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::InProgress => "in_progress",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "in_progress" => Ok(RunStatus::InProgress),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// A persisted flow definition — a named unit of work and its cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFlow {
    /// UUID v7 string — primary key.
    pub id: String,
    /// Unique human-readable name, used for lookup and manual triggering.
    pub name: String,
    /// Minimum number of seconds between consecutive runs. Strictly positive.
    pub run_interval_secs: i64,
    /// Disabled flows are never picked up by the sweep.
    pub enabled: bool,
    /// Name of the registered handler that executes this flow.
    pub handler: String,
    /// Arbitrary JSON payload forwarded to the handler on every run.
    pub params: serde_json::Value,
    /// UTC instant the most recent run touched this flow, if any.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Outcome of the most recent finished run, if any.
    pub last_run_status: Option<FlowOutcome>,
    /// UTC instant the flow was created.
    pub created_at: DateTime<Utc>,
    /// UTC instant of the last metadata update.
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating a flow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFlow {
    pub name: String,
    pub run_interval_secs: i64,
    pub handler: String,
    /// Opaque JSON forwarded to the handler. Defaults to null.
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// A persisted execution record for one occurrence of a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRun {
    /// UUID v7 string — primary key.
    pub id: String,
    /// Owning flow. Runs are deleted together with their flow.
    pub flow_id: String,
    /// Current lifecycle state.
    pub status: RunStatus,
    /// UTC instant from which this run counts as due.
    pub scheduled_at: DateTime<Utc>,
    /// UTC instant the run was claimed, if it ever started.
    pub started_at: Option<DateTime<Utc>>,
    /// UTC instant the run reached a terminal state, if it has.
    pub ended_at: Option<DateTime<Utc>>,
    /// Short error description for failed runs.
    pub error_message: Option<String>,
    /// Full error chain for failed runs, one cause per line.
    pub error_trace: Option<String>,
    /// UTC instant the run row was created.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_round_trips_through_strings() {
        for status in [
            RunStatus::Pending,
            RunStatus::InProgress,
            RunStatus::Success,
            RunStatus::Failed,
        ] {
            let parsed: RunStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn unknown_run_status_is_rejected() {
        assert!("cancelled".parse::<RunStatus>().is_err());
    }

    #[test]
    fn only_success_and_failed_are_terminal() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::InProgress.is_terminal());
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn flow_outcome_round_trips_through_strings() {
        for outcome in [FlowOutcome::Success, FlowOutcome::Failed] {
            let parsed: FlowOutcome = outcome.to_string().parse().unwrap();
            assert_eq!(parsed, outcome);
        }
    }

    #[test]
    fn new_flow_defaults_enabled_and_params() {
        let flow: NewFlow =
            serde_json::from_str(r#"{"name":"sync_inventory","run_interval_secs":60,"handler":"webhook"}"#)
                .unwrap();
        assert!(flow.enabled);
        assert!(flow.params.is_null());
    }
}
