use tracing::{error, info, warn};

use crate::{
    config::BackupConfig,
    remote::{RemoteSession, SessionError},
};

/// The two commands issued through the container runtime on each host.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RuntimeCommands {
    runtime: String,
    backup_command: String,
}

impl RuntimeCommands {
    pub fn new(runtime: &str, backup_command: &str) -> Self {
        RuntimeCommands {
            runtime: runtime.to_string(),
            backup_command: backup_command.to_string(),
        }
    }
    pub fn from_config(config: &BackupConfig) -> Self {
        RuntimeCommands::new(&config.container_runtime, &config.backup_command)
    }
    /// One running container name per output line.
    pub fn list_running(&self) -> String {
        format!("{} ps --format '{{{{.Names}}}}'", self.runtime)
    }
    pub fn trigger_backup(&self, container: &str) -> String {
        format!(
            "{} exec -i {} bash -c \"{}\"",
            self.runtime, container, self.backup_command
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Success,
    Fault(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ContainerOutcome {
    pub container: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HostReport {
    pub host: String,
    pub outcomes: Vec<ContainerOutcome>,
}

impl HostReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.outcome == Outcome::Success)
            .count()
    }
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Keeps the names containing at least one of `filters`, in listing order.
/// No filters keeps everything.
pub(crate) fn filter_containers<'a>(names: &[&'a str], filters: &[String]) -> Vec<&'a str> {
    if filters.is_empty() {
        return names.to_vec();
    }
    names
        .iter()
        .copied()
        .filter(|name| filters.iter().any(|f| name.contains(f.as_str())))
        .collect()
}

/// Lists the running containers of the session's host and triggers the backup
/// inside each one matching `name_filters`.
///
/// Only the listing can fail the whole host: a failing backup is logged,
/// recorded in the report, and the next container still runs.
pub(crate) async fn run_backup(
    session: &mut dyn RemoteSession,
    name_filters: &[String],
    commands: &RuntimeCommands,
) -> Result<HostReport, SessionError> {
    let host = session.host();
    let listing = session.run(&commands.list_running(), true).await?;
    let running: Vec<&str> = listing
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let retained = filter_containers(&running, name_filters);

    let mut report = HostReport {
        host: host.clone(),
        outcomes: Vec::with_capacity(retained.len()),
    };
    if retained.is_empty() {
        warn!("No matching containers found on {host}.");
        return Ok(report);
    }

    for container in retained {
        info!("Connecting to container {container} on {host}");
        let outcome = match session.run(&commands.trigger_backup(container), true).await {
            Ok(_) => Outcome::Success,
            Err(e) => Outcome::Fault(e.to_string()),
        };
        let outcome = ContainerOutcome {
            container: container.to_string(),
            outcome,
        };
        log_outcome(&host, &outcome);
        report.outcomes.push(outcome);
    }
    Ok(report)
}

fn log_outcome(host: &str, outcome: &ContainerOutcome) {
    let container = &outcome.container;
    match &outcome.outcome {
        Outcome::Success => {
            info!("Backup script completed successfully on {host} in container {container}")
        }
        Outcome::Fault(reason) => {
            error!("Error running backup script on {host} in container {container}: {reason}")
        }
    }
}
