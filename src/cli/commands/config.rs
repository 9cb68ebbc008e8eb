use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Args)]
pub struct ConfigCommands {
    #[command(subcommand)]
    pub command: ConfigSubcommands,
}

#[derive(Subcommand)]
pub enum ConfigSubcommands {
    /// Show the effective configuration (secrets redacted)
    Show,
    /// Print the config file location
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Import Azure credentials from AZURE_* variables or a .env file
    ImportEnv {
        /// Read this .env file instead of the process environment
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
