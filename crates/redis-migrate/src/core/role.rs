//! Replication role reported by `INFO replication`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Replication role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Writable primary (`role:master`).
    Primary,
    /// Read-only replica (`role:slave`).
    Replica,
    /// Unreachable, unparseable or any other role.
    Unknown,
}

impl Role {
    /// Extract the role from the body of `INFO replication`.
    ///
    /// A missing or unrecognised `role:` field yields [`Role::Unknown`].
    pub fn from_replication_info(info: &str) -> Self {
        info.lines()
            .filter_map(|line| line.trim().strip_prefix("role:"))
            .map(|role| match role.trim() {
                "master" => Role::Primary,
                "slave" | "replica" => Role::Replica,
                _ => Role::Unknown,
            })
            .next()
            .unwrap_or(Role::Unknown)
    }

    pub fn is_primary(self) -> bool {
        self == Role::Primary
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => f.write_str("master"),
            Role::Replica => f.write_str("replica"),
            Role::Unknown => f.write_str("unknown"),
        }
    }
}
