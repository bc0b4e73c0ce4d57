//! Core traits for talking to key-value nodes.
//!
//! - [`NodeConnection`]: An open, authenticated session to one node
//! - [`Connector`]: Opens sessions for a [`NodeEndpoint`]
//!
//! The migration engine depends only on the documented semantics of the
//! verbs below: `SCAN` is non-consistent, and `DUMP`/`RESTORE` payloads are
//! opaque and version-sensitive.

use async_trait::async_trait;

use crate::error::Result;

use super::endpoint::NodeEndpoint;

/// An owned, type-erased node session.
pub type NodeHandle = Box<dyn NodeConnection>;

/// An open session to one node.
///
/// A session has one currently selected logical database. It is mutable
/// connection state, so callers must issue [`select`](Self::select) before
/// every scan/dump/restore sequence that touches a given database.
#[async_trait]
pub trait NodeConnection: Send {
    /// The endpoint this session is connected to.
    fn endpoint(&self) -> &NodeEndpoint;

    /// Run `INFO <section>` and return the raw body.
    async fn info(&mut self, section: &str) -> Result<String>;

    /// Select logical database `db` for this session.
    async fn select(&mut self, db: u32) -> Result<()>;

    /// Run `SCAN cursor COUNT count`.
    ///
    /// Returns the next cursor (0 once the keyspace is exhausted) and the
    /// keys of this batch. `count` is a hint; the server may return more or
    /// fewer keys.
    async fn scan(&mut self, cursor: u64, count: usize) -> Result<(u64, Vec<Vec<u8>>)>;

    /// Remaining time-to-live in milliseconds (`-1` no expiry, `-2` missing).
    async fn pttl(&mut self, key: &[u8]) -> Result<i64>;

    /// Serialized value of `key`, or `None` if the key no longer exists.
    async fn dump(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// `RESTORE key ttl payload REPLACE`. A `ttl_ms` of 0 means no expiry.
    async fn restore(&mut self, key: &[u8], ttl_ms: u64, payload: &[u8]) -> Result<()>;

    /// Round-trip check.
    async fn ping(&mut self) -> Result<()>;

    /// Replace the underlying link with a freshly opened one.
    ///
    /// The new link starts on database 0.
    async fn reconnect(&mut self) -> Result<()>;
}

/// Opens [`NodeConnection`]s.
///
/// Each call returns an independent session; sessions are never shared.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and authenticate to `endpoint`.
    async fn connect(&self, endpoint: &NodeEndpoint) -> Result<NodeHandle>;
}
