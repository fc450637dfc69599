//! Formation core library: data model, state persistence, config patching.
//!
//! Public API surface:
//! - [`types`]: agent slug / id newtypes and naming conventions
//! - [`manifest`]: desired-state manifest
//! - [`state`] / [`state_store`]: last-applied state and its on-disk record
//! - [`runtime_config`] / [`patcher`]: the orchestrator's config document
//! - [`interpolate`]: `{{VAR}}` rendering and binary detection
//! - [`plan`] / [`discrepancy`]: planner and differ outputs
//! - [`error`]: [`FormationError`]

pub mod atomic;
pub mod discrepancy;
pub mod error;
pub mod hash;
pub mod interpolate;
pub mod manifest;
pub mod patcher;
pub mod paths;
pub mod plan;
pub mod runtime_config;
pub mod state;
pub mod state_store;
pub mod types;

pub use discrepancy::{Discrepancy, DiscrepancyKind, DiscrepancyTarget, DiscrepancyType};
pub use error::FormationError;
pub use interpolate::Interpolator;
pub use manifest::Manifest;
pub use plan::MigrationPlan;
pub use runtime_config::RuntimeConfig;
pub use state::{EdgeRecord, LastAppliedState, Topology};
pub use types::{AgentId, AgentSlug};
