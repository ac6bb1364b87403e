//! `flowbeat-scheduler` — periodic flow runner with SQLite persistence.
//!
//! # Overview
//!
//! A *flow* is a named unit of work with a run interval; a *run* is one
//! persisted occurrence of a flow. Flow definitions live in a `data_flows`
//! table ([`registry::FlowRegistry`]), runs in a `flow_runs` table
//! ([`ledger::RunLedger`]). The [`sweep::HeartbeatSweep`] seeds pending runs
//! for due flows and drives each due run through the
//! [`executor::RunExecutor`]: claim, invoke the flow's registered
//! [`invoker::FlowHandler`], record the outcome, schedule the next
//! occurrence.
//!
//! # Run lifecycle
//!
//! | Transition               | Guard                                      |
//! |--------------------------|--------------------------------------------|
//! | pending → in_progress    | atomic claim; losers skip the run          |
//! | in_progress → success    | handler returned Ok                        |
//! | in_progress → failed     | handler error, missing handler, or timeout |
//!
//! Terminal states are frozen; every terminal transition also updates the
//! flow's `last_run_at` / `last_run_status` and seeds the next pending run.

pub mod db;
pub mod error;
pub mod executor;
pub mod invoker;
pub mod ledger;
pub mod registry;
pub mod sweep;
pub mod types;

pub use error::{Result, SchedulerError};
pub use executor::RunExecutor;
pub use invoker::{FlowHandler, FlowInvoker, HandlerError, HandlerRegistry};
pub use ledger::RunLedger;
pub use registry::FlowRegistry;
pub use sweep::{HeartbeatSweep, SweepReport};
pub use types::{DataFlow, FlowOutcome, FlowRun, NewFlow, RunStatus};
