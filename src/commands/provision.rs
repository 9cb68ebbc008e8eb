use anyhow::Result;
use log::info;
use std::path::Path;
use std::sync::Arc;

use super::load_config;
use super::plan::{ProvisioningPlan, load_state, save_state};
use crate::cli::commands::ProvisionCommands;
use crate::provisioning::{InMemoryEnvironmentStore, Provisioner, ProvisioningRun};

/// Provision every environment in the plan (or the selected ones) and their users
///
/// Progress is written to the state file even when some environments fail,
/// so the next run resumes where this one stopped.
pub async fn provision_command(config_path: Option<&Path>, args: ProvisionCommands) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(provider) = args.provider {
        config.provider = provider;
    }
    if let Some(seed) = args.seed {
        config.mock.seed = Some(seed);
    }
    if args.no_delay {
        config.mock.with_delay = false;
    }
    if args.no_failure {
        config.mock.with_failure = false;
    }

    let plan = ProvisioningPlan::load(&args.plan)?;
    let mut state = load_state(&args.state)?;
    let added = plan.merge_into(&mut state);
    info!("Merged plan into state: {} new records", added);

    let targets = if args.environments.is_empty() {
        plan.environment_ids()
    } else {
        for id in &args.environments {
            if !state.environments.iter().any(|e| &e.id == id) {
                anyhow::bail!("Environment '{}' is not in the plan or state", id);
            }
        }
        args.environments.clone()
    };

    let provider = config.build_provider()?;
    let store = Arc::new(InMemoryEnvironmentStore::from_snapshot(state));
    let provisioner = Provisioner::new(provider.clone(), store.clone(), &config.resilience);

    println!(
        "Provisioning {} environment(s) with the {} provider",
        targets.len(),
        provider.name()
    );
    let runs = provisioner.provision_all(&targets, &plan.creator).await;

    save_state(&args.state, &store.snapshot())?;

    for run in &runs {
        print_run(run);
    }

    let metrics = provisioner.metrics();
    info!("Provisioning metrics: {}", serde_json::to_string(&metrics)?);
    println!(
        "\n{} provider call(s), {} retried, {:.1}% failed",
        metrics.global.total_operations, metrics.global.total_retries, metrics.global.error_rate
    );
    println!("Cost estimates: {}", provider.calculator_url());
    println!("State written to {:?}", args.state);

    let failed = runs.iter().filter(|run| !run.succeeded()).count();
    if failed > 0 {
        anyhow::bail!("{} of {} environment(s) did not finish provisioning", failed, runs.len());
    }
    Ok(())
}

fn print_run(run: &ProvisioningRun) {
    match &run.environment {
        Ok(outcome) => {
            let origin = if outcome.already_existed { "existing" } else { "created" };
            println!("✓ {} ({}) → {}", run.environment_id, origin, outcome.csp_id);
            println!("    login: {}", outcome.login_url);
        }
        Err(error) => {
            println!("✗ {}: {}", run.environment_id, error.message());
            return;
        }
    }

    match &run.users {
        Some(Ok(report)) => {
            println!(
                "    users: {} provisioned, {} failed, {} unchanged",
                report.provisioned.len(),
                report.failed.len(),
                report.skipped
            );
            for failure in &report.failed {
                println!("    ✗ {} ({}): {}", failure.user_id, failure.role, failure.error.message());
            }
        }
        Some(Err(error)) => println!("    ✗ users: {}", error.message()),
        None => {}
    }
}
