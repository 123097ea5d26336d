use clap::Parser;
use cli::BackupCli;
use driver::BackupError;
use remote::SshConnector;

mod backup;
mod cli;
mod config;
mod driver;
mod logging;
mod remote;

#[tokio::main]
pub async fn main() -> Result<(), BackupError> {
    let cli = BackupCli::parse();
    let config = config::load_configuration(cli.config.unwrap_or(config::DEFAULT_PATH.to_string()))?;
    logging::init(&config.log_file, config.log_level.into()).map_err(BackupError::Logging)?;

    let connector = SshConnector::new();
    driver::run_all(&config, &connector).await?;
    Ok(())
}
