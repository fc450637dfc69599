//! # formation-sync
//!
//! Reconciliation of an installed formation against reality.
//!
//! - [`planner::plan_migration`] diffs the installed record against a new
//!   manifest without touching anything.
//! - [`differ::collect_discrepancies`] compares the record with the runtime
//!   config, the agent workspaces, and the scheduler.
//! - [`repair::RepairEngine`] turns discrepancies into corrective actions.
//!
//! [`pipeline`] wires these into the `status`, `repair`, and `plan`
//! workflows the CLI runs.

pub mod differ;
pub mod error;
pub mod pipeline;
pub mod planner;
pub mod repair;
pub mod source;

#[cfg(test)]
mod test_support;

pub use differ::{collect_discrepancies, LiveJobs};
pub use error::SyncError;
pub use pipeline::{Context, RepairReport, SchedulerStatus, StatusReport};
pub use planner::plan_migration;
pub use repair::{
    GatewayConnector, RepairAction, RepairEngine, RepairOutcome, SchedulerConnector,
};
pub use source::RepairSource;
