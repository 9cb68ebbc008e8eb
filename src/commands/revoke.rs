use anyhow::{Context, Result};
use log::info;
use std::path::Path;
use std::sync::Arc;

use super::load_config;
use super::plan::{load_state, save_state};
use crate::cli::commands::RevokeCommands;
use crate::provisioning::{InMemoryEnvironmentStore, Provisioner};

pub async fn revoke_command(config_path: Option<&Path>, args: RevokeCommands) -> Result<()> {
    info!("Revoking user {} from {}", args.user, args.environment);

    if !args.state.exists() {
        anyhow::bail!("State file not found: {:?}", args.state);
    }

    let config = load_config(config_path)?;
    let state = load_state(&args.state)?;
    let store = Arc::new(InMemoryEnvironmentStore::from_snapshot(state));
    let provisioner = Provisioner::new(config.build_provider()?, store.clone(), &config.resilience);

    let result = provisioner.revoke_user(&args.environment, &args.user).await;
    save_state(&args.state, &store.snapshot())?;

    let role = result.with_context(|| format!("Failed to revoke user '{}'", args.user))?;
    println!(
        "✓ User {} removed from {} (status: {:?})",
        role.user.id, role.environment_id, role.status
    );
    Ok(())
}
