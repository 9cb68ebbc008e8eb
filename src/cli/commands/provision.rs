use crate::config::ProviderKind;
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct ProvisionCommands {
    /// TOML plan listing the creator, environments and roles
    #[arg(short, long)]
    pub plan: PathBuf,

    /// JSON state file; read to resume and rewritten after the run
    #[arg(short, long, default_value = "provisioning-state.json")]
    pub state: PathBuf,

    /// Only provision these environment ids (repeatable)
    #[arg(short, long = "environment")]
    pub environments: Vec<String>,

    /// Override the configured provider
    #[arg(long, value_enum)]
    pub provider: Option<ProviderKind>,

    /// Seed for the mock provider
    #[arg(long)]
    pub seed: Option<u64>,

    /// Disable simulated latency in the mock provider
    #[arg(long)]
    pub no_delay: bool,

    /// Disable injected failures in the mock provider
    #[arg(long)]
    pub no_failure: bool,
}
