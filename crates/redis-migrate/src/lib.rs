//! # redis-migrate
//!
//! Copy every key between two Redis deployments while preserving TTLs.
//!
//! This library provides the core functionality for migrating keys from one
//! replicated Redis deployment to another:
//!
//! - **Primary discovery** across an ordered list of candidate hosts
//! - **Keyspace snapshots** before and after the transfer
//! - **Dump/restore transfer** with per-key failure isolation
//! - **Retries** with linear backoff for transient errors
//! - **Parallel transfers** of independent databases
//!
//! ## Example
//!
//! ```rust,no_run
//! use redis_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> redis_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?.with_auto_tuning();
//!     let orchestrator = Orchestrator::new(config);
//!     let result = orchestrator.run(CancellationToken::new()).await?;
//!     println!("Restored {} keys", result.keys_restored);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod discovery;
pub mod drivers;
pub mod error;
pub mod inspect;
pub mod orchestrator;
pub mod report;
pub mod transfer;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use crate::config::{Config, DeploymentConfig, LogOutput, LoggingConfig, MigrationConfig};
pub use crate::core::{KeyspaceSnapshot, KeyspaceStats, NodeEndpoint, Role, Side};
pub use crate::error::{MigrateError, Result};
pub use crate::orchestrator::{HealthCheckResult, InspectResult, MigrationResult, Orchestrator, RunStatus};
pub use crate::report::StatusReporter;
pub use crate::transfer::{DatabaseStats, TransferConfig, TransferEngine, TransferReport};
