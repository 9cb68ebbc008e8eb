use anyhow::{Context, Result};
use log::info;
use std::path::Path;

use super::{config_file, load_config};
use crate::cli::commands::ConfigSubcommands;
use crate::config::Config;

pub async fn config_command(config_path: Option<&Path>, command: ConfigSubcommands) -> Result<()> {
    match command {
        ConfigSubcommands::Show => show_command(config_path),
        ConfigSubcommands::Path => {
            println!("{}", config_file(config_path)?.display());
            Ok(())
        }
        ConfigSubcommands::Init { force } => init_command(config_path, force),
        ConfigSubcommands::ImportEnv { file } => import_env_command(config_path, file.as_deref()),
    }
}

fn show_command(config_path: Option<&Path>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if !config.azure.secret_key.is_empty() {
        config.azure.secret_key = "[REDACTED]".to_string();
    }
    let rendered = toml::to_string_pretty(&config).context("Failed to serialize config to TOML")?;
    println!("{}", rendered);
    Ok(())
}

fn init_command(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = config_file(config_path)?;
    if path.exists() && !force {
        anyhow::bail!("Config file already exists: {:?} (use --force to overwrite)", path);
    }
    Config::default().save_to(&path)?;
    println!("✓ Wrote default config to {}", path.display());
    Ok(())
}

fn import_env_command(config_path: Option<&Path>, file: Option<&Path>) -> Result<()> {
    let path = config_file(config_path)?;
    let mut config = Config::load_from(&path)?;

    match file {
        Some(file) => config.import_azure_from_env_file(file)?,
        None => config.import_azure_from_env()?,
    }
    config.save_to(&path)?;

    info!("Azure credentials imported for tenant {}", config.azure.tenant_id);
    println!("✓ Imported Azure credentials; provider set to azure");
    Ok(())
}
