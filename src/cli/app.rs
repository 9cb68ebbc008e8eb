use super::commands::{ConfigCommands, ProvisionCommands, RevokeCommands};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "csp-provisioner")]
#[command(about = "Provision cloud environments, baseline roles and users through a CSP backend")]
pub struct Cli {
    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create environments, admin users, baselines and users from a plan
    Provision(ProvisionCommands),
    /// Suspend and delete a provisioned user
    Revoke(RevokeCommands),
    /// Configuration management
    Config(ConfigCommands),
}
