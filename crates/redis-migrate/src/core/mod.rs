//! Core abstractions for node-agnostic key migration.
//!
//! This module provides the foundational types and traits used throughout
//! the migration system:
//!
//! - [`endpoint`]: Node addresses, credentials and the source/target side
//! - [`keyspace`]: Per-database keyspace statistics snapshots
//! - [`role`]: Replication role reported by a node
//! - [`traits`]: The connection and connector traits drivers implement
//!
//! # Architecture
//!
//! Discovery, inspection and transfer only talk to nodes through
//! [`NodeConnection`]. The `drivers` module provides the Redis
//! implementation; tests use an in-memory one.

pub mod endpoint;
pub mod keyspace;
pub mod role;
pub mod traits;

pub use endpoint::{NodeEndpoint, Side, DEFAULT_PORT};
pub use keyspace::{KeyspaceSnapshot, KeyspaceStats};
pub use role::Role;
pub use traits::{Connector, NodeConnection, NodeHandle};
