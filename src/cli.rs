use clap::Parser;

#[derive(Parser)]
#[command(version, about = "Runs the backup script inside the running containers of your SSH hosts", long_about = None)]
pub(crate) struct BackupCli {
    /// custom config file (defaults to ./config.yaml)
    #[arg(short, long)]
    pub config: Option<String>,
}
