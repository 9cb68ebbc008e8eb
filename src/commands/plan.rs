//! Provisioning plans (TOML, written by hand) and run state (JSON, written by us)

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::csp::models::{CspRole, Environment, EnvironmentRole, RoleStatus, User};
use crate::provisioning::StoreSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningPlan {
    /// Portal user the environments are created on behalf of
    pub creator: User,
    #[serde(default)]
    pub environments: Vec<Environment>,
    #[serde(default)]
    pub roles: Vec<PlannedRole>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedRole {
    pub environment_id: String,
    pub role: CspRole,
    pub user: User,
}

impl ProvisioningPlan {
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading plan from: {:?}", path);
        let content = fs::read_to_string(path).with_context(|| format!("Failed to read plan file: {:?}", path))?;
        let plan: ProvisioningPlan =
            toml::from_str(&content).with_context(|| format!("Failed to parse plan file: {:?}", path))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for environment in &self.environments {
            if !ids.insert(environment.id.as_str()) {
                anyhow::bail!("Environment '{}' is listed more than once", environment.id);
            }
        }

        let mut assignments = HashSet::new();
        for planned in &self.roles {
            if !ids.contains(planned.environment_id.as_str()) {
                anyhow::bail!(
                    "Role for user '{}' references unknown environment '{}'",
                    planned.user.id,
                    planned.environment_id
                );
            }
            if !assignments.insert((planned.environment_id.as_str(), planned.user.id.as_str())) {
                anyhow::bail!(
                    "User '{}' has more than one role in environment '{}'",
                    planned.user.id,
                    planned.environment_id
                );
            }
        }
        Ok(())
    }

    pub fn environment_ids(&self) -> Vec<String> {
        self.environments.iter().map(|e| e.id.clone()).collect()
    }

    /// Add plan entries the state does not know yet; returns how many were added
    ///
    /// Recorded progress always wins over the plan. A planned role whose kind
    /// differs from the recorded one is reset to pending so the next run
    /// moves the user to the new role, unless the user was already removed.
    pub fn merge_into(&self, state: &mut StoreSnapshot) -> usize {
        let mut added = 0;

        for environment in &self.environments {
            if !state.environments.iter().any(|known| known.id == environment.id) {
                state.environments.push(environment.clone());
                added += 1;
            }
        }

        for planned in &self.roles {
            let recorded = state
                .roles
                .iter_mut()
                .find(|role| role.environment_id == planned.environment_id && role.user.id == planned.user.id);
            match recorded {
                Some(role) if role.role != planned.role && role.status != RoleStatus::Removed => {
                    info!(
                        "User {} moves from {} to {} in {}",
                        planned.user.id, role.role, planned.role, planned.environment_id
                    );
                    role.role = planned.role;
                    role.status = RoleStatus::Pending;
                }
                Some(_) => {}
                None => {
                    state.roles.push(EnvironmentRole::new(
                        planned.environment_id.clone(),
                        planned.user.clone(),
                        planned.role,
                    ));
                    added += 1;
                }
            }
        }

        added
    }
}

pub fn load_state(path: &Path) -> Result<StoreSnapshot> {
    if !path.exists() {
        debug!("No state file at {:?}, starting fresh", path);
        return Ok(StoreSnapshot::default());
    }
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read state file: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse state file: {:?}", path))
}

pub fn save_state(path: &Path, state: &StoreSnapshot) -> Result<()> {
    let content = serde_json::to_string_pretty(state).context("Failed to serialize state")?;
    fs::write(path, content).with_context(|| format!("Failed to write state file: {:?}", path))?;
    debug!("State saved to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
[creator]
id = "creator-1"
first_name = "Ada"
last_name = "Lovelace"
email = "ada@example.com"

[[environments]]
id = "env-1"
name = "dev"
application_name = "billing"
portfolio_name = "finance"

[[roles]]
environment_id = "env-1"
role = "BASIC_ACCESS"

[roles.user]
id = "u1"
first_name = "Grace"
last_name = "Hopper"
email = "grace@example.com"
"#;

    fn plan() -> ProvisioningPlan {
        toml::from_str(PLAN).unwrap()
    }

    #[test]
    fn test_parse_plan() {
        let plan = plan();
        plan.validate().unwrap();
        assert_eq!(plan.creator.id, "creator-1");
        assert_eq!(plan.environment_ids(), vec!["env-1".to_string()]);
        assert_eq!(plan.roles[0].role, CspRole::BasicAccess);
        assert!(plan.environments[0].csp_id.is_none());
    }

    #[test]
    fn test_role_for_unknown_environment_rejected() {
        let mut plan = plan();
        plan.roles[0].environment_id = "env-404".to_string();
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_merge_keeps_recorded_progress() {
        let plan = plan();
        let mut state = StoreSnapshot::default();
        assert_eq!(plan.merge_into(&mut state), 2);

        state.environments[0].csp_id = Some("csp-1".to_string());
        state.roles[0].status = RoleStatus::Active;

        assert_eq!(plan.merge_into(&mut state), 0);
        assert_eq!(state.environments[0].csp_id.as_deref(), Some("csp-1"));
        assert_eq!(state.roles[0].status, RoleStatus::Active);
    }

    #[test]
    fn test_merge_resets_changed_role() {
        let mut plan = plan();
        let mut state = StoreSnapshot::default();
        plan.merge_into(&mut state);
        state.roles[0].status = RoleStatus::Active;

        plan.roles[0].role = CspRole::TechnicalRead;
        plan.merge_into(&mut state);
        assert_eq!(state.roles[0].role, CspRole::TechnicalRead);
        assert_eq!(state.roles[0].status, RoleStatus::Pending);
    }

    #[test]
    fn test_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        assert_eq!(load_state(&path).unwrap(), StoreSnapshot::default());

        let mut state = StoreSnapshot::default();
        plan().merge_into(&mut state);
        save_state(&path, &state).unwrap();
        assert_eq!(load_state(&path).unwrap(), state);
    }
}
