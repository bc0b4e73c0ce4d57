//! Configuration validation.

use super::{Config, DeploymentConfig, LogOutput};
use crate::core::Side;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_deployment(Side::Source, &config.source)?;
    validate_deployment(Side::Target, &config.target)?;

    // Cannot migrate a deployment onto itself
    let source = config.source.endpoints()?;
    let target = config.target.endpoints()?;
    if source
        .iter()
        .any(|s| target.iter().any(|t| s.host() == t.host() && s.port() == t.port()))
    {
        return Err(MigrateError::Config(
            "source and target cannot share a host".into(),
        ));
    }

    // Migration config validation - only check if explicitly set
    if let Some(0) = config.migration.scan_count {
        return Err(MigrateError::Config(
            "migration.scan_count must be at least 1".into(),
        ));
    }
    if config.migration.workers == 0 {
        return Err(MigrateError::Config(
            "migration.workers must be at least 1".into(),
        ));
    }
    if config.migration.connect_timeout_ms == 0 {
        return Err(MigrateError::Config(
            "migration.connect_timeout_ms must be at least 1".into(),
        ));
    }
    if config.migration.response_timeout_ms == 0 {
        return Err(MigrateError::Config(
            "migration.response_timeout_ms must be at least 1".into(),
        ));
    }

    if config.logging.output == LogOutput::File && config.logging.file.as_os_str().is_empty() {
        return Err(MigrateError::Config(
            "logging.file is required when logging.output is 'file'".into(),
        ));
    }

    Ok(())
}

fn validate_deployment(side: Side, deployment: &DeploymentConfig) -> Result<()> {
    if deployment.hosts.is_empty() {
        return Err(MigrateError::Config(format!("{}.hosts is required", side)));
    }
    if deployment.hosts.iter().any(|h| h.trim().is_empty()) {
        return Err(MigrateError::Config(format!(
            "{}.hosts must not contain empty entries",
            side
        )));
    }
    if deployment.port == 0 {
        return Err(MigrateError::Config(format!("{}.port must not be 0", side)));
    }
    deployment.endpoints().map_err(|e| match e {
        MigrateError::Config(msg) => MigrateError::Config(format!("{}.hosts: {}", side, msg)),
        other => other,
    })?;
    Ok(())
}
