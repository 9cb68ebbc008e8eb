//! Portal-side records the provisioner reads and writes back
//!
//! The store is the source of truth for what has already been done:
//! recorded CSP ids, admin users and baseline maps are what let a re-run
//! skip completed steps.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::csp::models::{AdminUser, Environment, EnvironmentRole};

pub trait EnvironmentStore: Send + Sync {
    fn environment(&self, environment_id: &str) -> Option<Environment>;

    fn environments(&self) -> Vec<Environment>;

    fn save_environment(&self, environment: &Environment);

    /// Admin user with credentials, when this store holds them
    fn admin_user(&self, environment_id: &str) -> Option<AdminUser>;

    fn save_admin_user(&self, environment_id: &str, admin: &AdminUser);

    fn roles(&self, environment_id: &str) -> Vec<EnvironmentRole>;

    fn role(&self, environment_id: &str, user_id: &str) -> Option<EnvironmentRole>;

    fn save_role(&self, role: &EnvironmentRole);
}

/// Serializable store contents; admin credentials are never part of it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub environments: Vec<Environment>,
    #[serde(default)]
    pub roles: Vec<EnvironmentRole>,
}

#[derive(Debug, Default)]
pub struct InMemoryEnvironmentStore {
    inner: Mutex<Records>,
}

#[derive(Debug, Default)]
struct Records {
    environments: BTreeMap<String, Environment>,
    admins: HashMap<String, AdminUser>,
    /// (environment id, portal user id) -> role
    roles: BTreeMap<(String, String), EnvironmentRole>,
}

impl InMemoryEnvironmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let store = Self::new();
        for environment in &snapshot.environments {
            store.save_environment(environment);
        }
        for role in &snapshot.roles {
            store.save_role(role);
        }
        store
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let records = self.records();
        StoreSnapshot {
            environments: records.environments.values().cloned().collect(),
            roles: records.roles.values().cloned().collect(),
        }
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EnvironmentStore for InMemoryEnvironmentStore {
    fn environment(&self, environment_id: &str) -> Option<Environment> {
        self.records().environments.get(environment_id).cloned()
    }

    fn environments(&self) -> Vec<Environment> {
        self.records().environments.values().cloned().collect()
    }

    fn save_environment(&self, environment: &Environment) {
        self.records()
            .environments
            .insert(environment.id.clone(), environment.clone());
    }

    fn admin_user(&self, environment_id: &str) -> Option<AdminUser> {
        self.records().admins.get(environment_id).cloned()
    }

    fn save_admin_user(&self, environment_id: &str, admin: &AdminUser) {
        self.records()
            .admins
            .insert(environment_id.to_string(), admin.clone());
    }

    fn roles(&self, environment_id: &str) -> Vec<EnvironmentRole> {
        self.records()
            .roles
            .values()
            .filter(|role| role.environment_id == environment_id)
            .cloned()
            .collect()
    }

    fn role(&self, environment_id: &str, user_id: &str) -> Option<EnvironmentRole> {
        self.records()
            .roles
            .get(&(environment_id.to_string(), user_id.to_string()))
            .cloned()
    }

    fn save_role(&self, role: &EnvironmentRole) {
        self.records()
            .roles
            .insert((role.environment_id.clone(), role.user.id.clone()), role.clone());
    }
}
