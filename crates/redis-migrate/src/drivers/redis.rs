//! Redis driver built on the `redis` crate's multiplexed async connection.
//!
//! Each [`RedisNode`] owns a dedicated TCP connection. `SELECT` changes state
//! on that connection, so nodes are never cloned or shared between tasks.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Cmd, ConnectionAddr, ConnectionInfo, FromRedisValue, RedisConnectionInfo, RedisError};
use tracing::debug;

use crate::core::{Connector, NodeConnection, NodeEndpoint, NodeHandle};
use crate::error::{MigrateError, Result};

/// Server error codes worth retrying.
const TRANSIENT_CODES: &[&str] = &["BUSY", "LOADING", "TRYAGAIN", "OOM", "MASTERDOWN"];

/// Opens [`RedisNode`] sessions with bounded connect and reply timeouts.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl RedisConnector {
    pub fn new(connect_timeout: Duration, response_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            response_timeout,
        }
    }

    fn connection_info(endpoint: &NodeEndpoint) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(endpoint.host().to_string(), endpoint.port()),
            redis: RedisConnectionInfo {
                db: 0,
                username: endpoint.username().map(str::to_string),
                password: endpoint.password().map(str::to_string),
                ..Default::default()
            },
        }
    }
}

/// Open a multiplexed connection within `connect_timeout`.
async fn open(
    client: &redis::Client,
    endpoint: &NodeEndpoint,
    connect_timeout: Duration,
) -> Result<MultiplexedConnection> {
    // AUTH is sent as part of the handshake when a password is set
    let conn = tokio::time::timeout(connect_timeout, client.get_multiplexed_async_connection())
        .await
        .map_err(|_| {
            MigrateError::connection(
                endpoint,
                format!("timed out after {}ms", connect_timeout.as_millis()),
            )
        })?
        .map_err(|e| MigrateError::connection(endpoint, e.to_string()))?;

    debug!("Connected to {}", endpoint);
    Ok(conn)
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self, endpoint: &NodeEndpoint) -> Result<NodeHandle> {
        let client = redis::Client::open(Self::connection_info(endpoint))
            .map_err(|e| MigrateError::connection(endpoint, e.to_string()))?;
        let conn = open(&client, endpoint, self.connect_timeout).await?;

        Ok(Box::new(RedisNode {
            endpoint: endpoint.clone(),
            client,
            conn,
            connect_timeout: self.connect_timeout,
            response_timeout: self.response_timeout,
        }))
    }
}

/// An open session to one Redis node.
pub struct RedisNode {
    endpoint: NodeEndpoint,
    client: redis::Client,
    conn: MultiplexedConnection,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl RedisNode {
    async fn query<T>(&mut self, name: &str, cmd: &Cmd) -> Result<T>
    where
        T: FromRedisValue + Send,
    {
        match tokio::time::timeout(self.response_timeout, cmd.query_async(&mut self.conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(command_error(&self.endpoint, name, e)),
            Err(_) => Err(MigrateError::Timeout {
                endpoint: self.endpoint.to_string(),
                command: name.to_string(),
                timeout_ms: self.response_timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl NodeConnection for RedisNode {
    fn endpoint(&self) -> &NodeEndpoint {
        &self.endpoint
    }

    async fn info(&mut self, section: &str) -> Result<String> {
        let mut cmd = redis::cmd("INFO");
        cmd.arg(section);
        self.query("INFO", &cmd).await
    }

    async fn select(&mut self, db: u32) -> Result<()> {
        let mut cmd = redis::cmd("SELECT");
        cmd.arg(db);
        self.query("SELECT", &cmd).await
    }

    async fn scan(&mut self, cursor: u64, count: usize) -> Result<(u64, Vec<Vec<u8>>)> {
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor).arg("COUNT").arg(count);
        self.query("SCAN", &cmd).await
    }

    async fn pttl(&mut self, key: &[u8]) -> Result<i64> {
        let mut cmd = redis::cmd("PTTL");
        cmd.arg(key);
        self.query("PTTL", &cmd).await
    }

    async fn dump(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut cmd = redis::cmd("DUMP");
        cmd.arg(key);
        self.query("DUMP", &cmd).await
    }

    async fn restore(&mut self, key: &[u8], ttl_ms: u64, payload: &[u8]) -> Result<()> {
        let mut cmd = redis::cmd("RESTORE");
        cmd.arg(key).arg(ttl_ms).arg(payload).arg("REPLACE");
        self.query("RESTORE", &cmd).await
    }

    async fn ping(&mut self) -> Result<()> {
        let cmd = redis::cmd("PING");
        let _: String = self.query("PING", &cmd).await?;
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<()> {
        // A multiplexed connection never reopens its socket on its own
        self.conn = open(&self.client, &self.endpoint, self.connect_timeout).await?;
        Ok(())
    }
}

/// Classify a driver error into the crate's error taxonomy.
///
/// Link failures become [`MigrateError::Connection`] so callers know to
/// reopen the session; server replies stay [`MigrateError::Command`].
fn command_error(endpoint: &NodeEndpoint, command: &str, e: RedisError) -> MigrateError {
    if e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal() {
        return MigrateError::connection(endpoint, format!("{} failed: {}", command, e));
    }

    let transient = e.code().is_some_and(|code| TRANSIENT_CODES.contains(&code));
    MigrateError::Command {
        command: command.to_string(),
        message: e.to_string(),
        transient,
    }
}
