//! Human-readable status lines for snapshots and run events.
//!
//! Formatting is pure; [`StatusReporter`] hands every line to `tracing` at
//! the event's level and, when configured, to a channel (CLI progress
//! output, tests).

use std::fmt;

use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};

use crate::core::{KeyspaceSnapshot, NodeEndpoint, Role, Side};
use crate::transfer::DatabaseStats;

/// A discrete status event.
#[derive(Debug)]
pub enum Event<'a> {
    /// A probe reached a node and read its role.
    Probed {
        side: Side,
        endpoint: &'a NodeEndpoint,
        role: Role,
    },
    /// A probe could not connect or query the node.
    ProbeFailed {
        side: Side,
        endpoint: &'a NodeEndpoint,
        cause: &'a str,
    },
    /// The writable primary for a side was found.
    MasterFound {
        side: Side,
        endpoint: &'a NodeEndpoint,
    },
    /// No candidate host is a primary.
    NoMaster { side: Side },
    /// A located primary no longer reports itself as primary.
    MasterLost {
        side: Side,
        endpoint: &'a NodeEndpoint,
        role: Role,
    },
    /// Transfer of a database is starting.
    DatabaseStarted {
        db: u32,
        source: &'a NodeEndpoint,
        target: &'a NodeEndpoint,
    },
    /// Transfer of a database finished (possibly with per-key errors).
    DatabaseFinished {
        stats: &'a DatabaseStats,
        source: &'a NodeEndpoint,
        target: &'a NodeEndpoint,
    },
    /// A database could not be selected or scanned.
    DatabaseFailed { db: u32, cause: &'a str },
    /// A single key could not be transferred.
    KeyFailed {
        db: u32,
        key: &'a [u8],
        cause: &'a str,
    },
    /// A transient error is being retried.
    Retrying {
        operation: &'a str,
        attempt: u32,
        max_retries: u32,
        cause: &'a str,
    },
    /// Dry run: a database that would be copied.
    Planned { db: u32, keys: u64 },
    /// The run was cancelled before all databases were processed.
    Cancelled,
    /// The run is complete; final snapshots follow.
    Finished,
}

impl Event<'_> {
    /// Log level the event is emitted at.
    pub fn level(&self) -> Level {
        match self {
            Event::ProbeFailed { .. }
            | Event::NoMaster { .. }
            | Event::MasterLost { .. }
            | Event::DatabaseFailed { .. }
            | Event::KeyFailed { .. } => Level::ERROR,
            Event::Retrying { .. } | Event::Cancelled => Level::WARN,
            _ => Level::INFO,
        }
    }
}

impl fmt::Display for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Probed {
                side,
                endpoint,
                role,
            } => write!(f, "Probed {} host {}: role={}", side, endpoint, role),
            Event::ProbeFailed {
                side,
                endpoint,
                cause,
            } => write!(
                f,
                "Connection error on {} host {}: {}",
                side,
                endpoint,
                summarize_cause(cause)
            ),
            Event::MasterFound { side, endpoint } => {
                write!(f, "Connected to {} master: {}", side, endpoint)
            }
            Event::NoMaster { side } => write!(
                f,
                "Failed to find a master node among {} hosts. Stopping migration.",
                side
            ),
            Event::MasterLost {
                side,
                endpoint,
                role,
            } => write!(
                f,
                "{} master {} now reports role={}. Stopping migration.",
                capitalize(side),
                endpoint,
                role
            ),
            Event::DatabaseStarted { db, source, target } => write!(
                f,
                "Starting migration db{} from source {} to target {}",
                db, source, target
            ),
            Event::DatabaseFinished {
                stats,
                source,
                target,
            } => write!(
                f,
                "Finished migrating database db{} from {} to {}: scanned={}, restored={}, vanished={}, failed={} in {:.1}s",
                stats.db,
                source,
                target,
                stats.keys_scanned,
                stats.keys_restored,
                stats.keys_vanished,
                stats.keys_failed,
                stats.duration_seconds
            ),
            Event::DatabaseFailed { db, cause } => {
                write!(f, "Error migrating database db{}: {}", db, cause)
            }
            Event::KeyFailed { db, key, cause } => write!(
                f,
                "Error migrating key {} in db{}: {}",
                display_key(key),
                db,
                cause
            ),
            Event::Retrying {
                operation,
                attempt,
                max_retries,
                cause,
            } => write!(
                f,
                "Transient error during {}, retry {}/{}: {}",
                operation, attempt, max_retries, cause
            ),
            Event::Planned { db, keys } => {
                write!(f, "Dry run: would migrate db{} ({} keys)", db, keys)
            }
            Event::Cancelled => f.write_str("Migration cancelled; remaining databases skipped"),
            Event::Finished => f.write_str("Migration finished. Here is the final status:"),
        }
    }
}

/// Format a snapshot as one line.
///
/// `Source Keys: db0:keys=2,expires=1,avg_ttl=4998, db1:keys=...`, or
/// `Source Keys: No data available` for an empty snapshot.
pub fn format_snapshot(snapshot: &KeyspaceSnapshot, label: &str) -> String {
    if snapshot.is_empty() {
        return format!("{} Keys: No data available", label);
    }
    let entries: Vec<String> = snapshot
        .iter()
        .map(|(db, s)| {
            format!(
                "db{}:keys={},expires={},avg_ttl={}",
                db, s.keys, s.expires, s.avg_ttl
            )
        })
        .collect();
    format!("{} Keys: {}", label, entries.join(", "))
}

/// First clause of an error message.
///
/// Provider messages can run long; everything after the first sentence
/// break (`". "`) or line break is dropped. Dots inside addresses such as
/// `10.0.0.1` are kept.
pub fn summarize_cause(cause: &str) -> &str {
    let line = cause.lines().next().unwrap_or("");
    let end = line.find(". ").unwrap_or(line.len());
    line[..end].trim_end_matches('.').trim()
}

/// Printable form of a binary key.
pub fn display_key(key: &[u8]) -> String {
    key.escape_ascii().to_string()
}

fn capitalize(side: &Side) -> &'static str {
    match side {
        Side::Source => "Source",
        Side::Target => "Target",
    }
}

/// Emits status lines through `tracing` and an optional channel.
#[derive(Debug, Clone, Default)]
pub struct StatusReporter {
    tx: Option<mpsc::UnboundedSender<String>>,
}

impl StatusReporter {
    /// Reporter that only logs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also forward every formatted line to `tx`.
    pub fn with_channel(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Report a keyspace snapshot under `label` ("Source", "Target").
    pub fn snapshot(&self, snapshot: &KeyspaceSnapshot, label: &str) {
        let line = format_snapshot(snapshot, label);
        info!("{}", line);
        self.forward(line);
    }

    /// Report a discrete event.
    pub fn event(&self, event: &Event<'_>) {
        let line = event.to_string();
        match event.level() {
            Level::ERROR => error!("{}", line),
            Level::WARN => warn!("{}", line),
            _ => info!("{}", line),
        }
        self.forward(line);
    }

    fn forward(&self, line: String) {
        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is listening any more
            let _ = tx.send(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::KeyspaceStats;

    #[test]
    fn test_format_snapshot() {
        let snap = KeyspaceSnapshot::from_entries(vec![
            (
                0,
                KeyspaceStats {
                    keys: 2,
                    expires: 1,
                    avg_ttl: 4998,
                },
            ),
            (
                4,
                KeyspaceStats {
                    keys: 7,
                    expires: 0,
                    avg_ttl: 0,
                },
            ),
        ]);
        assert_eq!(
            format_snapshot(&snap, "Source"),
            "Source Keys: db0:keys=2,expires=1,avg_ttl=4998, db4:keys=7,expires=0,avg_ttl=0"
        );
    }

    #[test]
    fn test_format_empty_snapshot() {
        assert_eq!(
            format_snapshot(&KeyspaceSnapshot::empty(), "Target"),
            "Target Keys: No data available"
        );
    }

    #[test]
    fn test_summarize_cause_keeps_first_clause() {
        assert_eq!(
            summarize_cause("Error 111 connecting to 172.18.0.2:6379. Connection refused."),
            "Error 111 connecting to 172.18.0.2:6379"
        );
        assert_eq!(summarize_cause("timed out after 5000ms"), "timed out after 5000ms");
        assert_eq!(summarize_cause("first line\nsecond line"), "first line");
        assert_eq!(summarize_cause("ends with a dot."), "ends with a dot");
    }

    #[test]
    fn test_display_key_escapes_binary() {
        assert_eq!(display_key(b"user:1"), "user:1");
        assert_eq!(display_key(b"\x00\xffk"), "\\x00\\xffk");
    }

    #[test]
    fn test_event_lines() {
        let ep = NodeEndpoint::new("172.18.0.2", 6379);
        let line = Event::MasterFound {
            side: Side::Source,
            endpoint: &ep,
        }
        .to_string();
        assert_eq!(line, "Connected to source master: 172.18.0.2:6379");

        let failed = Event::KeyFailed {
            db: 3,
            key: b"bad",
            cause: "RESTORE failed: ERR Bad data format",
        };
        assert_eq!(failed.level(), Level::ERROR);
        assert!(failed.to_string().contains("key bad in db3"));

        let probe = Event::ProbeFailed {
            side: Side::Target,
            endpoint: &ep,
            cause: "Connection refused. Is the server running?",
        };
        assert_eq!(
            probe.to_string(),
            "Connection error on target host 172.18.0.2:6379: Connection refused"
        );
    }

    #[tokio::test]
    async fn test_reporter_forwards_lines() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = StatusReporter::with_channel(tx);
        reporter.snapshot(&KeyspaceSnapshot::empty(), "Source");
        reporter.event(&Event::Finished);

        assert_eq!(rx.recv().await.unwrap(), "Source Keys: No data available");
        assert_eq!(
            rx.recv().await.unwrap(),
            "Migration finished. Here is the final status:"
        );
    }
}
