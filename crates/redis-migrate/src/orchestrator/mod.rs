//! Migration orchestrator - main workflow coordinator.
//!
//! A run goes through four phases:
//!
//! 1. Locate the writable primary on each side (source first)
//! 2. Snapshot both keyspaces and report them
//! 3. Transfer every database present in the source snapshot
//! 4. Snapshot both keyspaces again and report them

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::{Connector, KeyspaceSnapshot, NodeConnection, NodeEndpoint, Role, Side};
use crate::discovery::{cause_of, query_role, MasterLocator, Prober};
use crate::drivers::RedisConnector;
use crate::error::{MigrateError, Result, EXIT_CANCELLED, EXIT_PARTIAL_TRANSFER, EXIT_SUCCESS};
use crate::inspect;
use crate::report::{Event, StatusReporter};
use crate::transfer::{DatabaseFailure, DatabaseStats, TransferConfig, TransferEngine, TransferReport};

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every key was transferred or had vanished.
    Completed,
    /// The run finished but some keys or databases failed.
    CompletedWithErrors,
    /// Stopped by a shutdown signal.
    Cancelled,
    /// Nothing was written.
    DryRun,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithErrors => "completed_with_errors",
            RunStatus::Cancelled => "cancelled",
            RunStatus::DryRun => "dry_run",
        };
        f.write_str(s)
    }
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: RunStatus,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Source primary the keys were read from.
    pub source_master: String,

    /// Target primary the keys were written to.
    pub target_master: String,

    /// Databases found in the source snapshot.
    pub databases_total: usize,

    /// Keys returned by SCAN.
    pub keys_scanned: u64,

    /// Keys restored on the target.
    pub keys_restored: u64,

    /// Keys that disappeared before they could be dumped.
    pub keys_vanished: u64,

    /// Keys that failed to transfer.
    pub keys_failed: u64,

    /// Average throughput (keys/second).
    pub keys_per_second: u64,

    /// Per-database statistics.
    pub databases: Vec<DatabaseStats>,

    /// Databases that could not be selected or scanned.
    pub failed_databases: Vec<DatabaseFailure>,

    /// Keyspace snapshots taken before the transfer.
    pub source_before: KeyspaceSnapshot,
    pub target_before: KeyspaceSnapshot,

    /// Keyspace snapshots taken after the transfer.
    pub source_after: KeyspaceSnapshot,
    pub target_after: KeyspaceSnapshot,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> u8 {
        match self.status {
            RunStatus::Completed | RunStatus::DryRun => EXIT_SUCCESS,
            RunStatus::CompletedWithErrors => EXIT_PARTIAL_TRANSFER,
            RunStatus::Cancelled => EXIT_CANCELLED,
        }
    }
}

/// Keyspace snapshots of both primaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectResult {
    pub source_master: String,
    pub target_master: String,
    pub source: KeyspaceSnapshot,
    pub target: KeyspaceSnapshot,
}

/// Reachability and role of one candidate host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostHealth {
    pub host: String,
    pub connected: bool,
    pub role: Role,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// Result of a health check across every configured host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source: Vec<HostHealth>,
    pub target: Vec<HostHealth>,
    /// Both sides have exactly one reachable primary.
    pub healthy: bool,
}

impl HealthCheckResult {
    fn primaries(hosts: &[HostHealth]) -> usize {
        hosts.iter().filter(|h| h.role.is_primary()).count()
    }

    pub fn source_primaries(&self) -> usize {
        Self::primaries(&self.source)
    }

    pub fn target_primaries(&self) -> usize {
        Self::primaries(&self.target)
    }
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    connector: Arc<dyn Connector>,
    reporter: StatusReporter,
}

impl Orchestrator {
    /// Create a new orchestrator talking to real Redis nodes.
    pub fn new(config: Config) -> Self {
        let connector = RedisConnector::new(
            Duration::from_millis(config.migration.connect_timeout_ms),
            Duration::from_millis(config.migration.response_timeout_ms),
        );
        Self::with_connector(config, Arc::new(connector))
    }

    /// Create an orchestrator using a custom connector.
    pub fn with_connector(config: Config, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            reporter: StatusReporter::new(),
        }
    }

    /// Route status lines through `reporter`.
    pub fn with_reporter(mut self, reporter: StatusReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn locator(&self) -> MasterLocator {
        let prober = Prober::new(self.connector.clone(), self.reporter.clone());
        MasterLocator::new(prober, self.reporter.clone())
    }

    /// Run the migration.
    ///
    /// Fails only when a side has no primary, a primary is lost before the
    /// transfer, or the configuration is unusable. Key and database errors
    /// are reported in the result.
    pub async fn run(&self, cancel: CancellationToken) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting migration run: {}", run_id);

        let source_hosts = self.config.source.endpoints()?;
        let target_hosts = self.config.target.endpoints()?;

        // Phase 1: Locate primaries
        let locator = self.locator();
        let (source_ep, mut source) = locator.locate(Side::Source, &source_hosts).await?;
        let (target_ep, mut target) = locator.locate(Side::Target, &target_hosts).await?;

        // Phase 2: Snapshot
        let source_before = inspect::snapshot(source.as_mut()).await;
        let target_before = inspect::snapshot(target.as_mut()).await;
        self.reporter.snapshot(&source_before, "Source");
        self.reporter.snapshot(&target_before, "Target");

        if self.config.migration.revalidate_primary {
            self.revalidate(Side::Source, source.as_mut()).await?;
            self.revalidate(Side::Target, target.as_mut()).await?;
        }

        // Phase 3: Transfer
        let databases = source_before.databases();
        let migration = &self.config.migration;
        let engine = Arc::new(
            TransferEngine::new(TransferConfig::from(migration), self.reporter.clone())
                .with_cancellation(cancel.clone()),
        );

        let report = if migration.dry_run {
            for &db in &databases {
                let keys = source_before.get(db).map_or(0, |s| s.keys);
                self.reporter.event(&Event::Planned { db, keys });
            }
            TransferReport::default()
        } else if migration.workers > 1 && databases.len() > 1 {
            info!(
                "Transferring {} databases with {} workers",
                databases.len(),
                migration.workers
            );
            self.transfer_parallel(engine.clone(), &source_ep, &target_ep, &databases, &cancel)
                .await
        } else {
            engine
                .migrate(source.as_mut(), target.as_mut(), &databases)
                .await
        };

        // Phase 4: Final snapshot
        let source_after = inspect::snapshot(source.as_mut()).await;
        let target_after = inspect::snapshot(target.as_mut()).await;
        self.reporter.event(&Event::Finished);
        self.reporter.snapshot(&source_after, "Source");
        self.reporter.snapshot(&target_after, "Target");

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let status = if migration.dry_run {
            RunStatus::DryRun
        } else if report.cancelled {
            RunStatus::Cancelled
        } else if report.has_errors() {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Completed
        };

        let keys_restored = report.keys_restored();
        let keys_per_second = if duration > 0.0 {
            (keys_restored as f64 / duration) as u64
        } else {
            0
        };

        let result = MigrationResult {
            run_id,
            status,
            duration_seconds: duration,
            started_at,
            completed_at,
            source_master: source_ep.to_string(),
            target_master: target_ep.to_string(),
            databases_total: databases.len(),
            keys_scanned: report.keys_scanned(),
            keys_restored,
            keys_vanished: report.keys_vanished(),
            keys_failed: report.keys_failed(),
            keys_per_second,
            databases: report.databases,
            failed_databases: report.failed_databases,
            source_before,
            target_before,
            source_after,
            target_after,
        };

        info!(
            "Migration {}: {} databases, {} keys restored, {} failed in {:.1}s ({} keys/s)",
            result.status,
            result.databases_total,
            result.keys_restored,
            result.keys_failed,
            result.duration_seconds,
            result.keys_per_second
        );

        Ok(result)
    }

    /// Re-check that a located primary is still a primary.
    async fn revalidate(&self, side: Side, conn: &mut dyn NodeConnection) -> Result<()> {
        let role = match query_role(conn).await {
            Ok(role) if role.is_primary() => return Ok(()),
            Ok(role) => role,
            Err(e) => {
                self.reporter.event(&Event::ProbeFailed {
                    side,
                    endpoint: conn.endpoint(),
                    cause: &cause_of(&e),
                });
                Role::Unknown
            }
        };
        self.reporter.event(&Event::MasterLost {
            side,
            endpoint: conn.endpoint(),
            role,
        });
        Err(MigrateError::NoPrimary { side })
    }

    /// Transfer databases concurrently, one session pair per database.
    async fn transfer_parallel(
        &self,
        engine: Arc<TransferEngine>,
        source: &NodeEndpoint,
        target: &NodeEndpoint,
        databases: &[u32],
        cancel: &CancellationToken,
    ) -> TransferReport {
        let semaphore = Arc::new(Semaphore::new(self.config.migration.workers));
        let mut report = TransferReport::default();
        let mut handles = Vec::new();

        for &db in databases {
            if cancel.is_cancelled() {
                info!("Cancellation requested, stopping new transfers");
                report.cancelled = true;
                break;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let engine = engine.clone();
            let connector = self.connector.clone();
            let (source, target) = (source.clone(), target.clone());

            let handle = tokio::spawn(async move {
                let mut src = connector.connect(&source).await?;
                let mut tgt = connector.connect(&target).await?;
                ensure_primary(Side::Source, src.as_mut()).await?;
                ensure_primary(Side::Target, tgt.as_mut()).await?;
                let result = engine.transfer_database(src.as_mut(), tgt.as_mut(), db).await;
                drop(permit);
                result
            });

            handles.push((db, handle));
        }

        for (db, handle) in handles {
            match handle.await {
                Ok(result) => engine.record(&mut report, db, result),
                Err(e) => engine.record(
                    &mut report,
                    db,
                    Err(MigrateError::command("transfer", format!("worker task failed: {}", e))),
                ),
            }
        }

        report.databases.sort_by_key(|stats| stats.db);
        if report.cancelled {
            self.reporter.event(&Event::Cancelled);
        }
        report
    }

    /// Locate both primaries and report their keyspaces without writing.
    pub async fn inspect(&self) -> Result<InspectResult> {
        let locator = self.locator();
        let (source_ep, mut source) = locator
            .locate(Side::Source, &self.config.source.endpoints()?)
            .await?;
        let (target_ep, mut target) = locator
            .locate(Side::Target, &self.config.target.endpoints()?)
            .await?;

        let source_snapshot = inspect::snapshot(source.as_mut()).await;
        let target_snapshot = inspect::snapshot(target.as_mut()).await;
        self.reporter.snapshot(&source_snapshot, "Source");
        self.reporter.snapshot(&target_snapshot, "Target");

        Ok(InspectResult {
            source_master: source_ep.to_string(),
            target_master: target_ep.to_string(),
            source: source_snapshot,
            target: target_snapshot,
        })
    }

    /// Connect to every configured host and report its role and latency.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let source = self.check_hosts(&self.config.source.endpoints()?).await;
        let target = self.check_hosts(&self.config.target.endpoints()?).await;

        let healthy =
            HealthCheckResult::primaries(&source) == 1 && HealthCheckResult::primaries(&target) == 1;
        if !healthy {
            warn!("Health check: each side needs exactly one reachable primary");
        }

        Ok(HealthCheckResult {
            source,
            target,
            healthy,
        })
    }

    async fn check_hosts(&self, endpoints: &[NodeEndpoint]) -> Vec<HostHealth> {
        let mut hosts = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let start = Instant::now();
            let outcome = match self.connector.connect(endpoint).await {
                Ok(mut conn) => match conn.ping().await {
                    Ok(()) => query_role(conn.as_mut()).await,
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };
            let latency_ms = start.elapsed().as_millis() as u64;

            hosts.push(match outcome {
                Ok(role) => HostHealth {
                    host: endpoint.to_string(),
                    connected: true,
                    role,
                    latency_ms,
                    error: None,
                },
                Err(e) => HostHealth {
                    host: endpoint.to_string(),
                    connected: false,
                    role: Role::Unknown,
                    latency_ms,
                    error: Some(e.to_string()),
                },
            });
        }
        hosts
    }
}

/// Fail unless a freshly opened session still reaches a primary.
async fn ensure_primary(side: Side, conn: &mut dyn NodeConnection) -> Result<()> {
    let role = query_role(conn).await?;
    if role.is_primary() {
        Ok(())
    } else {
        Err(MigrateError::MasterLost {
            side,
            endpoint: conn.endpoint().to_string(),
            role,
        })
    }
}
