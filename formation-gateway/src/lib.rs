//! Gateway RPC client: newline-delimited JSON over TCP or a Unix socket.

pub mod auth;
pub mod client;
mod error;
pub mod protocol;

pub use auth::{resolve, Credential, Endpoint, GatewayOptions, ResolvedGateway};
pub use client::{probe, CronScheduler, GatewayClient};
pub use error::GatewayError;
pub use protocol::{CronAddSpec, CronAdded, CronJob, CronListOptions, CronPatch};
