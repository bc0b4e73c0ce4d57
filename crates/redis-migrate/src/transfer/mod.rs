//! Scan/dump/restore transfer engine.
//!
//! For each database the engine selects it on both sessions, pages through
//! the source keyspace with `SCAN`, and copies every key with
//! `PTTL` + `DUMP` + `RESTORE ... REPLACE`.
//!
//! - One failing key never aborts its batch, database or run
//! - Transient errors are retried with linear backoff; a session whose link
//!   dropped is reopened, and the database is re-selected on both sessions
//!   before every retry
//! - `SCAN` is non-consistent, so keys may be seen more than once; restore
//!   with replace makes that harmless

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::MigrationConfig;
use crate::core::NodeConnection;
use crate::error::{MigrateError, Result};
use crate::report::{display_key, Event, StatusReporter};

/// Transfer engine configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// `COUNT` hint per SCAN request.
    pub scan_count: usize,
    /// Retries after the first attempt for transient errors.
    pub max_retries: u32,
    /// Backoff step; attempt N waits `retry_base_delay * N`.
    pub retry_base_delay: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            scan_count: 1_000,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(200),
        }
    }
}

impl From<&MigrationConfig> for TransferConfig {
    fn from(config: &MigrationConfig) -> Self {
        Self {
            scan_count: config.get_scan_count(),
            max_retries: config.retry.max_retries,
            retry_base_delay: Duration::from_millis(config.retry.base_delay_ms),
        }
    }
}

/// Statistics for one transferred database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseStats {
    /// Database index.
    pub db: u32,
    /// SCAN round trips.
    pub batches: u64,
    /// Keys returned by SCAN (duplicates included).
    pub keys_scanned: u64,
    /// Keys restored on the target.
    pub keys_restored: u64,
    /// Keys that disappeared between SCAN and DUMP.
    pub keys_vanished: u64,
    /// Keys that could not be transferred.
    pub keys_failed: u64,
    /// Wall time for this database.
    pub duration_seconds: f64,
    /// The scan stopped early because the run was cancelled.
    pub cancelled: bool,
}

/// A database that could not be selected or scanned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseFailure {
    pub db: u32,
    pub error: String,
}

/// Outcome of transferring a set of databases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferReport {
    /// Databases that were scanned to completion (or until cancellation).
    pub databases: Vec<DatabaseStats>,
    /// Databases aborted by a select/scan failure.
    pub failed_databases: Vec<DatabaseFailure>,
    /// The run was cancelled before every database was processed.
    pub cancelled: bool,
}

impl TransferReport {
    pub fn keys_scanned(&self) -> u64 {
        self.databases.iter().map(|d| d.keys_scanned).sum()
    }

    pub fn keys_restored(&self) -> u64 {
        self.databases.iter().map(|d| d.keys_restored).sum()
    }

    pub fn keys_vanished(&self) -> u64 {
        self.databases.iter().map(|d| d.keys_vanished).sum()
    }

    pub fn keys_failed(&self) -> u64 {
        self.databases.iter().map(|d| d.keys_failed).sum()
    }

    /// Whether any key or database failed.
    pub fn has_errors(&self) -> bool {
        self.keys_failed() > 0 || !self.failed_databases.is_empty()
    }
}

/// Outcome of one key transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Written to the target.
    Restored,
    /// Gone before it could be dumped.
    Vanished,
}

/// A key read from the source, alive only for one dump/restore transfer.
#[derive(Debug)]
struct KeyRecord<'a> {
    key: &'a [u8],
    ttl_ms: u64,
    payload: Vec<u8>,
}

/// Map a `PTTL` reply to a restore TTL.
///
/// `-1` (no expiry), `-2` (missing) and any other non-positive value become
/// 0, which `RESTORE` treats as "no expiration".
pub fn clamp_ttl(pttl: i64) -> u64 {
    if pttl > 0 {
        pttl as u64
    } else {
        0
    }
}

/// Transfer engine for copying keys between two sessions.
pub struct TransferEngine {
    config: TransferConfig,
    reporter: StatusReporter,
    cancel: CancellationToken,
}

impl TransferEngine {
    /// Create a new transfer engine.
    pub fn new(config: TransferConfig, reporter: StatusReporter) -> Self {
        Self {
            config,
            reporter,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop scanning (between batches) once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Transfer `databases` one after another over a single session pair.
    ///
    /// Never fails: database-level errors are recorded in the report and
    /// the engine moves on to the next database.
    pub async fn migrate(
        &self,
        source: &mut dyn NodeConnection,
        target: &mut dyn NodeConnection,
        databases: &[u32],
    ) -> TransferReport {
        let mut report = TransferReport::default();

        for &db in databases {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let result = self.transfer_database(source, target, db).await;
            self.record(&mut report, db, result);
            if report.cancelled {
                break;
            }
        }

        if report.cancelled {
            self.reporter.event(&Event::Cancelled);
        }
        report
    }

    /// Add one database's outcome to `report`.
    pub fn record(&self, report: &mut TransferReport, db: u32, result: Result<DatabaseStats>) {
        match result {
            Ok(stats) => {
                report.cancelled |= stats.cancelled;
                report.databases.push(stats);
            }
            Err(e) => {
                let error = e.to_string();
                self.reporter
                    .event(&Event::DatabaseFailed { db, cause: &error });
                report.failed_databases.push(DatabaseFailure { db, error });
            }
        }
    }

    /// Copy every key of database `db`.
    ///
    /// Returns an error only when the database cannot be selected or
    /// scanned; per-key failures are counted in the stats.
    pub async fn transfer_database(
        &self,
        source: &mut dyn NodeConnection,
        target: &mut dyn NodeConnection,
        db: u32,
    ) -> Result<DatabaseStats> {
        self.reporter.event(&Event::DatabaseStarted {
            db,
            source: source.endpoint(),
            target: target.endpoint(),
        });

        let start = Instant::now();
        let mut stats = DatabaseStats {
            db,
            ..Default::default()
        };

        select_both(source, target, db).await?;

        let mut cursor = 0u64;
        loop {
            if self.cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }

            let (next, keys) = self.scan_batch(source, target, db, cursor).await?;
            stats.batches += 1;
            debug!("db{}: cursor {} -> {} ({} keys)", db, cursor, next, keys.len());

            for key in &keys {
                stats.keys_scanned += 1;
                match self.transfer_key(source, target, db, key).await {
                    Ok(KeyOutcome::Restored) => {
                        stats.keys_restored += 1;
                    }
                    Ok(KeyOutcome::Vanished) => {
                        stats.keys_vanished += 1;
                    }
                    Err(e) => {
                        stats.keys_failed += 1;
                        self.reporter.event(&Event::KeyFailed {
                            db,
                            key,
                            cause: &e.to_string(),
                        });
                    }
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        stats.duration_seconds = start.elapsed().as_secs_f64();
        self.reporter.event(&Event::DatabaseFinished {
            stats: &stats,
            source: source.endpoint(),
            target: target.endpoint(),
        });
        Ok(stats)
    }

    /// One SCAN round trip, retried on transient errors.
    async fn scan_batch(
        &self,
        source: &mut dyn NodeConnection,
        target: &mut dyn NodeConnection,
        db: u32,
        cursor: u64,
    ) -> Result<(u64, Vec<Vec<u8>>)> {
        let mut attempt = 0;
        let mut result = source.scan(cursor, self.config.scan_count).await;
        loop {
            match result {
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    self.backoff(&format!("SCAN in db{}", db), attempt, &e.to_string())
                        .await;
                    result = match resume(source, target, db, &e).await {
                        Ok(()) => source.scan(cursor, self.config.scan_count).await,
                        Err(e) => Err(e),
                    };
                }
                other => return other,
            }
        }
    }

    /// Transfer one key, retrying transient errors.
    async fn transfer_key(
        &self,
        source: &mut dyn NodeConnection,
        target: &mut dyn NodeConnection,
        db: u32,
        key: &[u8],
    ) -> Result<KeyOutcome> {
        let mut attempt = 0;
        let mut result = copy_key(source, target, key).await;
        loop {
            match result {
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let operation = format!("key {} in db{}", display_key(key), db);
                    self.backoff(&operation, attempt, &e.to_string()).await;
                    result = match resume(source, target, db, &e).await {
                        Ok(()) => copy_key(source, target, key).await,
                        Err(e) => Err(e),
                    };
                }
                other => return other,
            }
        }
    }

    async fn backoff(&self, operation: &str, attempt: u32, cause: &str) {
        self.reporter.event(&Event::Retrying {
            operation,
            attempt,
            max_retries: self.config.max_retries,
            cause,
        });
        tokio::time::sleep(self.config.retry_base_delay * attempt).await;
    }
}

/// Select `db` on both sessions.
async fn select_both(
    source: &mut dyn NodeConnection,
    target: &mut dyn NodeConnection,
    db: u32,
) -> Result<()> {
    source.select(db).await?;
    target.select(db).await
}

/// Get both sessions ready for another attempt after `error`.
///
/// A session whose link was lost is reopened first. Either way `db` is
/// selected again on both sides, since a new link starts on database 0.
async fn resume(
    source: &mut dyn NodeConnection,
    target: &mut dyn NodeConnection,
    db: u32,
    error: &MigrateError,
) -> Result<()> {
    if let Some(lost) = error.lost_endpoint() {
        reopen_if_lost(source, lost).await?;
        reopen_if_lost(target, lost).await?;
    }
    select_both(source, target, db).await
}

async fn reopen_if_lost(conn: &mut dyn NodeConnection, lost: &str) -> Result<()> {
    if conn.endpoint().to_string() == lost {
        info!("Reconnecting to {}", lost);
        conn.reconnect().await?;
    }
    Ok(())
}

/// Read TTL and payload of `key`; `None` if it vanished after the scan.
async fn read_key<'a>(source: &mut dyn NodeConnection, key: &'a [u8]) -> Result<Option<KeyRecord<'a>>> {
    let ttl_ms = clamp_ttl(source.pttl(key).await?);
    match source.dump(key).await? {
        Some(payload) if !payload.is_empty() => Ok(Some(KeyRecord {
            key,
            ttl_ms,
            payload,
        })),
        _ => Ok(None),
    }
}

async fn copy_key(
    source: &mut dyn NodeConnection,
    target: &mut dyn NodeConnection,
    key: &[u8],
) -> Result<KeyOutcome> {
    match read_key(source, key).await? {
        None => Ok(KeyOutcome::Vanished),
        Some(record) => {
            target
                .restore(record.key, record.ttl_ms, &record.payload)
                .await?;
            Ok(KeyOutcome::Restored)
        }
    }
}
