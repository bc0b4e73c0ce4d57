//! Node endpoints and migration sides.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// Default Redis port used when a host string has none.
pub const DEFAULT_PORT: u16 = 6379;

/// Which deployment an endpoint or error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Source,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => f.write_str("source"),
            Side::Target => f.write_str("target"),
        }
    }
}

/// Address and credentials of one Redis process.
///
/// Immutable once constructed; the password never appears in `Debug`
/// or `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct NodeEndpoint {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
}

impl NodeEndpoint {
    /// Create an endpoint without credentials.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Parse `host`, `host:port` or `[ipv6]:port`, falling back to `default_port`.
    pub fn parse(addr: &str, default_port: u16) -> Result<Self> {
        let addr = addr.trim();
        if addr.is_empty() {
            return Err(MigrateError::Config("host must not be empty".into()));
        }

        // Bracketed IPv6, optionally followed by :port
        if let Some(rest) = addr.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| {
                MigrateError::Config(format!("invalid host '{}': missing ']'", addr))
            })?;
            let port = match tail.strip_prefix(':') {
                Some(p) => parse_port(addr, p)?,
                None if tail.is_empty() => default_port,
                None => {
                    return Err(MigrateError::Config(format!("invalid host '{}'", addr)));
                }
            };
            return Ok(Self::new(host, port));
        }

        // A bare IPv6 address has several colons and no port
        if addr.matches(':').count() > 1 {
            return Ok(Self::new(addr, default_port));
        }

        match addr.split_once(':') {
            Some((host, port)) if !host.is_empty() => Ok(Self::new(host, parse_port(addr, port)?)),
            Some(_) => Err(MigrateError::Config(format!("invalid host '{}'", addr))),
            None => Ok(Self::new(addr, default_port)),
        }
    }

    /// Attach credentials used for AUTH on connect.
    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username.filter(|u| !u.is_empty());
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

fn parse_port(addr: &str, port: &str) -> Result<u16> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(MigrateError::Config(format!(
            "invalid port in host '{}'",
            addr
        ))),
        Ok(p) => Ok(p),
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Debug for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
