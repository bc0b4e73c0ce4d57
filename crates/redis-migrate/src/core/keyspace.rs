//! Keyspace statistics snapshots.
//!
//! A snapshot is built once from `INFO keyspace` and never mutated. Each
//! entry carries the database index as an integer, so callers never have
//! to re-derive it from the `dbN` statistics key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Key statistics for one logical database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyspaceStats {
    /// Number of keys.
    pub keys: u64,
    /// Number of keys with an expiration.
    pub expires: u64,
    /// Average remaining time-to-live in milliseconds.
    pub avg_ttl: u64,
}

/// Point-in-time key statistics per logical database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyspaceSnapshot {
    databases: BTreeMap<u32, KeyspaceStats>,
}

impl KeyspaceSnapshot {
    /// An empty snapshot (no data available).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from `(database, stats)` pairs. Empty databases are dropped.
    pub fn from_entries(entries: impl IntoIterator<Item = (u32, KeyspaceStats)>) -> Self {
        Self {
            databases: entries
                .into_iter()
                .filter(|(_, stats)| stats.keys > 0)
                .collect(),
        }
    }

    /// Parse the body of `INFO keyspace`.
    ///
    /// Lines look like `db0:keys=2,expires=1,avg_ttl=4998,subexpiry=0`.
    /// Unknown fields are ignored and malformed lines are skipped.
    pub fn parse(info: &str) -> Self {
        let entries = info.lines().filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let parsed = parse_line(line);
            if parsed.is_none() {
                debug!("Skipping unrecognised keyspace line: {}", line);
            }
            parsed
        });
        Self::from_entries(entries)
    }

    /// Indexes of all non-empty databases, ascending.
    pub fn databases(&self) -> Vec<u32> {
        self.databases.keys().copied().collect()
    }

    pub fn get(&self, db: u32) -> Option<&KeyspaceStats> {
        self.databases.get(&db)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &KeyspaceStats)> {
        self.databases.iter().map(|(db, stats)| (*db, stats))
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.databases.len()
    }

    /// Sum of keys across all databases.
    pub fn total_keys(&self) -> u64 {
        self.databases.values().map(|s| s.keys).sum()
    }
}

fn parse_line(line: &str) -> Option<(u32, KeyspaceStats)> {
    let (name, fields) = line.split_once(':')?;
    let db = name.strip_prefix("db")?.parse::<u32>().ok()?;

    let mut stats = KeyspaceStats::default();
    let mut saw_keys = false;
    for field in fields.split(',') {
        let (k, v) = field.split_once('=')?;
        match k.trim() {
            "keys" => {
                stats.keys = v.trim().parse().ok()?;
                saw_keys = true;
            }
            "expires" => stats.expires = v.trim().parse().ok()?,
            "avg_ttl" => stats.avg_ttl = v.trim().parse().ok()?,
            _ => {}
        }
    }

    saw_keys.then_some((db, stats))
}
