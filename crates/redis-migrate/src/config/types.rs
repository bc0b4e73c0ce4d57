//! Configuration type definitions with auto-tuning based on system resources.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

use crate::core::{NodeEndpoint, DEFAULT_PORT};
use crate::error::Result;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in bytes.
    pub total_memory_bytes: u64,
    /// Total RAM in GB.
    pub total_memory_gb: f64,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let total_memory_bytes = sys.total_memory();
        let total_memory_gb = total_memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0);

        Self {
            total_memory_bytes,
            total_memory_gb,
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!("System resources: {:.1} GB RAM", self.total_memory_gb);
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Deployment keys are copied from.
    pub source: DeploymentConfig,

    /// Deployment keys are copied to.
    pub target: DeploymentConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Log output routing.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.migration = self.migration.with_auto_tuning(&resources);
        self
    }
}

/// One Redis deployment: candidate hosts sharing a credential.
#[derive(Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Candidate hosts, probed in order (`host` or `host:port`).
    pub hosts: Vec<String>,

    /// Port for hosts without an explicit one (default: 6379).
    #[serde(default = "default_port")]
    pub port: u16,

    /// ACL username (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password.
    #[serde(default)]
    pub password: String,
}

impl DeploymentConfig {
    /// Resolve the host list into endpoints carrying this deployment's credentials.
    pub fn endpoints(&self) -> Result<Vec<NodeEndpoint>> {
        self.hosts
            .iter()
            .map(|h| {
                NodeEndpoint::parse(h, self.port).map(|ep| {
                    ep.with_credentials(self.username.clone(), Some(self.password.clone()))
                })
            })
            .collect()
    }
}

impl fmt::Debug for DeploymentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentConfig")
            .field("hosts", &self.hosts)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Migration behavior configuration.
/// Tunables use Option<T> to distinguish between "not set" (use auto-tuned
/// default) and "explicitly set" (use provided value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// `COUNT` hint per SCAN request. Auto-tuned based on RAM if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_count: Option<usize>,

    /// Databases transferred concurrently, each on its own connections (default: 1).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Connect timeout per host in milliseconds (default: 5000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-command reply timeout in milliseconds (default: 30000).
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Re-check both primaries right before transferring (default: true).
    #[serde(default = "default_true")]
    pub revalidate_primary: bool,

    /// Discover and snapshot only, without copying keys (default: false).
    #[serde(default)]
    pub dry_run: bool,

    /// Retry policy for transient per-key and scan errors.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            scan_count: None,
            workers: default_workers(),
            connect_timeout_ms: default_connect_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            revalidate_primary: true,
            dry_run: false,
            retry: RetryConfig::default(),
        }
    }
}

impl MigrationConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        let ram_gb = resources.total_memory_gb;

        // Scan count: scale with RAM
        // Base: 1000 keys, +500 per 8GB of RAM, cap at 5000
        if self.scan_count.is_none() {
            let count = 1_000 + ((ram_gb / 8.0) as usize * 500);
            self.scan_count = Some(count.clamp(1_000, 5_000));
        }

        info!(
            "Auto-tuned config: scan_count={}, workers={}",
            self.get_scan_count(),
            self.workers
        );

        self
    }

    pub fn get_scan_count(&self) -> usize {
        self.scan_count.unwrap_or(1_000)
    }
}

/// Retry policy for transient errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retries after the first attempt (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Linear backoff step in milliseconds: delay = base * attempt (default: 200).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutput {
    #[default]
    Stdout,
    File,
    Syslog,
}

/// Log routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Output destination (default: stdout).
    #[serde(default)]
    pub output: LogOutput,

    /// Log file path, appended to when `output: file`.
    #[serde(default = "default_log_file")]
    pub file: PathBuf,

    /// Syslog datagram socket when `output: syslog` (default: /dev/log).
    #[serde(default = "default_syslog_socket")]
    pub syslog_socket: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            output: LogOutput::default(),
            file: default_log_file(),
            syslog_socket: default_syslog_socket(),
        }
    }
}

// Default value functions for serde
fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_workers() -> usize {
    1
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_response_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_log_file() -> PathBuf {
    PathBuf::from("redis-migrate.log")
}

fn default_syslog_socket() -> PathBuf {
    PathBuf::from("/dev/log")
}

fn default_true() -> bool {
    true
}
