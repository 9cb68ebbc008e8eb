use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct RevokeCommands {
    /// Environment the user belongs to
    #[arg(short, long)]
    pub environment: String,

    /// Portal user id
    #[arg(short, long)]
    pub user: String,

    /// JSON state file written by `provision`
    #[arg(short, long, default_value = "provisioning-state.json")]
    pub state: PathBuf,
}
