use thiserror::Error;
use tracing::{error, info};

use crate::{
    backup::{self, HostReport, RuntimeCommands},
    config::{self, BackupConfig, ConfigError, HostFailurePolicy, ResolvedConnection},
    remote::{Connector, SessionError},
};

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{host}: {source}")]
    Host { host: String, source: SessionError },
    #[error("cannot set up logging: {0}")]
    Logging(String),
}

/// One connection descriptor per configured host, in configuration order.
pub(crate) fn build_sessions(config: &BackupConfig) -> Result<Vec<ResolvedConnection>, ConfigError> {
    config
        .connections
        .as_deref()
        .ok_or(ConfigError::MissingField("connections"))?
        .iter()
        .map(|entry| config::resolve(entry, &config.defaults))
        .collect()
}

/// Backs up every configured host, one after the other.
///
/// A host that cannot be reached or listed either stops the run or is
/// skipped, depending on `host_failure_policy`. Container failures never
/// surface here.
pub(crate) async fn run_all(
    config: &BackupConfig,
    connector: &dyn Connector,
) -> Result<Vec<HostReport>, BackupError> {
    let targets = build_sessions(config)?;
    let commands = RuntimeCommands::from_config(config);
    let mut reports = Vec::with_capacity(targets.len());

    for target in &targets {
        let result = match connector.connect(target).await {
            Ok(mut session) => {
                backup::run_backup(session.as_mut(), config.name_filters(), &commands).await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(report) => reports.push(report),
            Err(e) => {
                error!("Error backing up {}: {e}", target.host);
                if config.host_failure_policy == HostFailurePolicy::Abort {
                    return Err(BackupError::Host {
                        host: target.host.clone(),
                        source: e,
                    });
                }
            }
        }
    }

    let succeeded: usize = reports.iter().map(HostReport::succeeded).sum();
    let failed: usize = reports.iter().map(HostReport::failed).sum();
    info!(
        "Backup run finished: {} of {} hosts processed, {succeeded} containers backed up, {failed} failed",
        reports.len(),
        targets.len()
    );
    Ok(reports)
}
