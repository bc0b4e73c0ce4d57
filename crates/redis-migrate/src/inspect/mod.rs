//! Keyspace inspection.

use tracing::warn;

use crate::core::{KeyspaceSnapshot, NodeConnection};

/// Capture a keyspace snapshot from `INFO keyspace`.
///
/// Never fails: a query error is logged and yields an empty snapshot.
pub async fn snapshot(conn: &mut dyn NodeConnection) -> KeyspaceSnapshot {
    match conn.info("keyspace").await {
        Ok(info) => KeyspaceSnapshot::parse(&info),
        Err(e) => {
            warn!(
                "Failed to read keyspace statistics from {}: {}",
                conn.endpoint(),
                e
            );
            KeyspaceSnapshot::empty()
        }
    }
}
