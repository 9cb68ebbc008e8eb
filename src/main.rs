use anyhow::Result;
use clap::Parser;
use log::info;

use csp_provisioner::cli::{Cli, Commands};
use csp_provisioner::commands::{config_command, provision_command, revoke_command};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger to file (truncate on each run)
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open("csp-provisioner.log")?;
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .init();

    let cli = Cli::parse();
    info!("Starting csp-provisioner");

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Provision(args) => provision_command(config_path, args).await,
        Commands::Revoke(args) => revoke_command(config_path, args).await,
        Commands::Config(args) => config_command(config_path, args.command).await,
    }
}
