//! Primary discovery: probe candidate hosts and keep the first writable one.
//!
//! Probing never fails the caller. Connection and query errors become a
//! single log line and an [`Role::Unknown`] outcome so the locator can move
//! on to the next host. Only exhausting the whole host list is fatal.

use std::sync::Arc;

use tracing::debug;

use crate::core::{Connector, NodeConnection, NodeEndpoint, NodeHandle, Role, Side};
use crate::error::{MigrateError, Result};
use crate::report::{Event, StatusReporter};

/// Result of probing one endpoint.
pub struct ProbeOutcome {
    /// Role reported by the node, `Unknown` when unreachable.
    pub role: Role,
    /// The open session, if the connection succeeded.
    pub connection: Option<NodeHandle>,
}

/// Query the replication role on an open session.
pub async fn query_role(conn: &mut dyn NodeConnection) -> Result<Role> {
    let info = conn.info("replication").await?;
    Ok(Role::from_replication_info(&info))
}

/// Connects to endpoints and reports their replication role.
#[derive(Clone)]
pub struct Prober {
    connector: Arc<dyn Connector>,
    reporter: StatusReporter,
}

impl Prober {
    pub fn new(connector: Arc<dyn Connector>, reporter: StatusReporter) -> Self {
        Self {
            connector,
            reporter,
        }
    }

    /// Probe one endpoint. Logs exactly one line per call.
    pub async fn probe(&self, side: Side, endpoint: &NodeEndpoint) -> ProbeOutcome {
        let mut conn = match self.connector.connect(endpoint).await {
            Ok(conn) => conn,
            Err(e) => {
                self.reporter.event(&Event::ProbeFailed {
                    side,
                    endpoint,
                    cause: &cause_of(&e),
                });
                return ProbeOutcome {
                    role: Role::Unknown,
                    connection: None,
                };
            }
        };

        match query_role(conn.as_mut()).await {
            Ok(role) => {
                self.reporter.event(&Event::Probed {
                    side,
                    endpoint,
                    role,
                });
                ProbeOutcome {
                    role,
                    connection: Some(conn),
                }
            }
            Err(e) => {
                self.reporter.event(&Event::ProbeFailed {
                    side,
                    endpoint,
                    cause: &cause_of(&e),
                });
                ProbeOutcome {
                    role: Role::Unknown,
                    connection: Some(conn),
                }
            }
        }
    }
}

/// Finds the writable primary among an ordered list of candidates.
#[derive(Clone)]
pub struct MasterLocator {
    prober: Prober,
    reporter: StatusReporter,
}

impl MasterLocator {
    pub fn new(prober: Prober, reporter: StatusReporter) -> Self {
        Self { prober, reporter }
    }

    /// Probe `endpoints` in order and return the first primary's session.
    ///
    /// Stops at the first primary, so a primary at position N+1 costs
    /// exactly N+1 probes. Returns [`MigrateError::NoPrimary`] for `side`
    /// when the list is exhausted.
    pub async fn locate(
        &self,
        side: Side,
        endpoints: &[NodeEndpoint],
    ) -> Result<(NodeEndpoint, NodeHandle)> {
        for endpoint in endpoints {
            let outcome = self.prober.probe(side, endpoint).await;
            match (outcome.role, outcome.connection) {
                (Role::Primary, Some(conn)) => {
                    self.reporter
                        .event(&Event::MasterFound { side, endpoint });
                    return Ok((endpoint.clone(), conn));
                }
                (role, _) => {
                    debug!("Skipping {} host {} (role={})", side, endpoint, role);
                }
            }
        }

        self.reporter.event(&Event::NoMaster { side });
        Err(MigrateError::NoPrimary { side })
    }
}

/// The part of `e` worth showing after "Connection error on ...".
pub(crate) fn cause_of(e: &MigrateError) -> String {
    match e {
        MigrateError::Connection { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryConnector, MemoryServer};

    fn locator(connector: &MemoryConnector) -> MasterLocator {
        let reporter = StatusReporter::new();
        let prober = Prober::new(Arc::new(connector.clone()), reporter.clone());
        MasterLocator::new(prober, reporter)
    }

    fn endpoints(hosts: &[&str]) -> Vec<NodeEndpoint> {
        hosts
            .iter()
            .map(|h| NodeEndpoint::parse(h, 6379).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_probe_reports_role() {
        let connector = MemoryConnector::new();
        connector.add("10.0.0.1:6379", MemoryServer::replica());
        let prober = Prober::new(Arc::new(connector.clone()), StatusReporter::new());

        let outcome = prober
            .probe(Side::Source, &NodeEndpoint::new("10.0.0.1", 6379))
            .await;
        assert_eq!(outcome.role, Role::Replica);
        assert!(outcome.connection.is_some());
    }

    #[tokio::test]
    async fn test_probe_unreachable_is_unknown() {
        let connector = MemoryConnector::new();
        let prober = Prober::new(Arc::new(connector.clone()), StatusReporter::new());

        let outcome = prober
            .probe(Side::Source, &NodeEndpoint::new("10.0.0.9", 6379))
            .await;
        assert_eq!(outcome.role, Role::Unknown);
        assert!(outcome.connection.is_none());
    }

    #[tokio::test]
    async fn test_probe_failing_info_is_unknown() {
        let connector = MemoryConnector::new();
        let server = MemoryServer::primary();
        server.fail_info(true);
        connector.add("10.0.0.1:6379", server);
        let prober = Prober::new(Arc::new(connector.clone()), StatusReporter::new());

        let outcome = prober
            .probe(Side::Target, &NodeEndpoint::new("10.0.0.1", 6379))
            .await;
        assert_eq!(outcome.role, Role::Unknown);
    }

    #[tokio::test]
    async fn test_probe_logs_one_line_per_attempt() {
        let connector = MemoryConnector::new();
        connector.add("10.0.0.1:6379", MemoryServer::primary());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let prober = Prober::new(Arc::new(connector.clone()), StatusReporter::with_channel(tx));

        prober
            .probe(Side::Source, &NodeEndpoint::new("10.0.0.1", 6379))
            .await;
        prober
            .probe(Side::Source, &NodeEndpoint::new("10.0.0.2", 6379))
            .await;
        drop(prober);

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("role=master"));
        assert!(lines[1].starts_with("Connection error on source host 10.0.0.2:6379"));
    }

    #[tokio::test]
    async fn test_locate_stops_at_first_primary() {
        let connector = MemoryConnector::new();
        connector.add("10.0.0.1:6379", MemoryServer::replica());
        connector.add("10.0.0.2:6379", MemoryServer::replica());
        connector.add("10.0.0.3:6379", MemoryServer::primary());
        connector.add("10.0.0.4:6379", MemoryServer::primary());

        let eps = endpoints(&["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"]);
        let (found, conn) = locator(&connector)
            .locate(Side::Source, &eps)
            .await
            .unwrap();

        assert_eq!(found.to_string(), "10.0.0.3:6379");
        assert_eq!(conn.endpoint().to_string(), "10.0.0.3:6379");
        assert_eq!(connector.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_locate_skips_unreachable_hosts() {
        let connector = MemoryConnector::new();
        connector.add("10.0.0.2:6379", MemoryServer::primary());

        let eps = endpoints(&["10.0.0.1", "10.0.0.2"]);
        let (found, _) = locator(&connector)
            .locate(Side::Target, &eps)
            .await
            .unwrap();
        assert_eq!(found.host(), "10.0.0.2");
        assert_eq!(connector.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_locate_exhaustion_names_side() {
        let connector = MemoryConnector::new();
        connector.add("10.0.0.1:6379", MemoryServer::replica());

        let eps = endpoints(&["10.0.0.1", "10.0.0.2"]);
        let err = locator(&connector)
            .locate(Side::Target, &eps)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MigrateError::NoPrimary { side: Side::Target }));
    }
}
