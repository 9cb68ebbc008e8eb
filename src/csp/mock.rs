//! Reference provider used for conformance testing and local runs
//!
//! Simulates a remote CSP in memory and injects network failures,
//! operation failures and latency from an explicitly seeded RNG, so a given
//! seed always replays the same sequence of outcomes.

use async_trait::async_trait;
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use super::error::{CspError, CspResult, UNKNOWN_ENVIRONMENT};
use super::models::{AdminUser, AuthCredentials, BaselineRoleMap, CspRole, Environment, EnvironmentRole, User};
use super::provider::CloudProvider;

pub const NETWORK_FAILURE_PCT: u32 = 7;
pub const ENV_CREATE_FAILURE_PCT: u32 = 12;
pub const ATAT_ADMIN_CREATE_FAILURE_PCT: u32 = 12;
pub const USER_REMOVAL_FAILURE_PCT: u32 = 12;

const MIN_DELAY_UNITS: u32 = 1;
const MAX_DELAY_UNITS: u32 = 5;

/// Behaviour switches for [`MockCloudProvider`]
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub with_delay: bool,
    pub with_failure: bool,
    /// Length of one delay unit; each call sleeps 1..5 units
    pub delay_unit: Duration,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            with_delay: true,
            with_failure: true,
            delay_unit: Duration::from_secs(1),
        }
    }
}

impl MockConfig {
    /// No latency and no injected failures
    pub fn reliable() -> Self {
        Self {
            with_delay: false,
            with_failure: false,
            delay_unit: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct MockUser {
    env_identifier: String,
    role_id: String,
    suspended: bool,
    deleted: bool,
}

#[derive(Debug, Default)]
struct MockState {
    /// portal environment id -> CSP environment id
    environments: HashMap<String, String>,
    /// CSP environment id -> portal environment id
    csp_environments: HashMap<String, String>,
    creating: HashSet<String>,
    admins: HashMap<String, String>,
    /// role id -> CSP environment id
    roles: HashMap<String, String>,
    users: HashMap<String, MockUser>,
    issued_ids: HashSet<String>,
}

/// Holds an environment in the creating set until dropped, including when
/// the create future is cancelled mid-flight
struct CreatingGuard<'a> {
    provider: &'a MockCloudProvider,
    environment_id: String,
}

impl Drop for CreatingGuard<'_> {
    fn drop(&mut self) {
        self.provider.state().creating.remove(&self.environment_id);
    }
}

pub struct MockCloudProvider {
    config: MockConfig,
    rng: Mutex<StdRng>,
    state: Mutex<MockState>,
}

impl MockCloudProvider {
    pub fn new(config: MockConfig, rng: StdRng) -> Self {
        Self {
            config,
            rng: Mutex::new(rng),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Reproducible provider: the same seed replays the same failures and ids
    pub fn seeded(config: MockConfig, seed: u64) -> Self {
        Self::new(config, StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy(config: MockConfig) -> Self {
        Self::new(config, StdRng::from_entropy())
    }

    /// The only credentials the mock accepts
    pub fn reference_credentials() -> AuthCredentials {
        AuthCredentials::new()
            .with("username", "mock-cloud")
            .with("pass", "shh")
    }

    pub fn config(&self) -> &MockConfig {
        &self.config
    }

    async fn authorize(&self, auth: &AuthCredentials) -> CspResult<()> {
        self.delay().await;
        if *auth != Self::reference_credentials() {
            warn!("Mock provider rejected credentials with keys {:?}", auth.keys().collect::<Vec<_>>());
            return Err(CspError::authentication("Authentication failure."));
        }
        Ok(())
    }

    async fn delay(&self) {
        if !self.config.with_delay {
            return;
        }
        let units = self.rng().gen_range(MIN_DELAY_UNITS..MAX_DELAY_UNITS);
        let duration = self.config.delay_unit * units;
        debug!("Mock provider sleeping for {:?}", duration);
        tokio::time::sleep(duration).await;
    }

    fn maybe(&self, pct: u32) -> bool {
        self.rng().gen_range(0..100) < pct
    }

    fn maybe_raise(&self, pct: u32, error: impl FnOnce() -> CspError) -> CspResult<()> {
        if self.config.with_failure && self.maybe(pct) {
            let error = error();
            debug!("Mock provider injecting failure: {}", error);
            return Err(error);
        }
        Ok(())
    }

    fn maybe_network_failure(&self) -> CspResult<()> {
        self.maybe_raise(NETWORK_FAILURE_PCT, || CspError::connection("Network failure."))
    }

    /// 128-bit random hex token, never repeated by this instance
    fn new_id(&self) -> String {
        let mut state = self.state();
        loop {
            let bytes: [u8; 16] = self.rng().r#gen();
            let id = uuid::Builder::from_random_bytes(bytes)
                .into_uuid()
                .simple()
                .to_string();
            if state.issued_ids.insert(id.clone()) {
                return id;
            }
        }
    }

    fn rng(&self) -> std::sync::MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_environment(&self, csp_environment_id: &str, error: impl FnOnce() -> CspError) -> CspResult<()> {
        let known = self.state().csp_environments.contains_key(csp_environment_id);
        if known { Ok(()) } else { Err(error()) }
    }

    async fn create_environment_inner(&self, environment: &Environment) -> CspResult<String> {
        self.delay().await;
        self.maybe_network_failure()?;
        self.maybe_raise(ENV_CREATE_FAILURE_PCT, || {
            CspError::environment_creation(&environment.id, "Could not create environment.")
        })?;

        let csp_id = self.new_id();
        let mut state = self.state();
        state.environments.insert(environment.id.clone(), csp_id.clone());
        state.csp_environments.insert(csp_id.clone(), environment.id.clone());
        Ok(csp_id)
    }
}

#[async_trait]
impl CloudProvider for MockCloudProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn root_credentials(&self) -> AuthCredentials {
        Self::reference_credentials()
    }

    async fn create_environment(
        &self,
        auth: &AuthCredentials,
        user: &User,
        environment: &Environment,
    ) -> CspResult<String> {
        self.authorize(auth).await?;

        {
            let mut state = self.state();
            if state.environments.contains_key(&environment.id) {
                return Err(CspError::environment_exists(&environment.id));
            }
            if !state.creating.insert(environment.id.clone()) {
                return Err(CspError::operation_in_progress(format!(
                    "creation of environment {}",
                    environment.id
                )));
            }
        }

        let _creating = CreatingGuard {
            provider: self,
            environment_id: environment.id.clone(),
        };
        debug!("Mock provider creating environment {} for {}", environment.id, user.id);
        self.create_environment_inner(environment).await
    }

    async fn create_atat_admin_user(
        &self,
        auth: &AuthCredentials,
        csp_environment_id: &str,
    ) -> CspResult<AdminUser> {
        self.authorize(auth).await?;
        self.ensure_environment(csp_environment_id, || {
            CspError::user_provisioning(csp_environment_id, "atat-admin", "unknown environment")
        })?;

        self.delay().await;
        self.maybe_network_failure()?;
        self.maybe_raise(ATAT_ADMIN_CREATE_FAILURE_PCT, || {
            CspError::user_provisioning(csp_environment_id, "atat-admin", "Could not create admin user.")
        })?;

        let user_id = self.new_id();
        self.state()
            .admins
            .insert(user_id.clone(), csp_environment_id.to_string());

        Ok(AdminUser {
            user_id,
            credentials: Self::reference_credentials(),
        })
    }

    async fn create_environment_baseline(
        &self,
        auth: &AuthCredentials,
        csp_environment_id: &str,
    ) -> CspResult<BaselineRoleMap> {
        self.authorize(auth).await?;
        self.ensure_environment(csp_environment_id, || {
            CspError::baseline_provision(csp_environment_id, "unknown environment")
        })?;

        self.delay().await;
        self.maybe_network_failure()?;
        self.maybe_raise(ATAT_ADMIN_CREATE_FAILURE_PCT, || {
            CspError::baseline_provision(csp_environment_id, "Could not create environment baseline.")
        })?;

        let roles: BTreeMap<CspRole, String> = CspRole::ALL
            .iter()
            .map(|role| (*role, self.new_id()))
            .collect();

        {
            let mut state = self.state();
            for role_id in roles.values() {
                state.roles.insert(role_id.clone(), csp_environment_id.to_string());
            }
        }

        BaselineRoleMap::new(csp_environment_id, roles)
    }

    async fn create_or_update_user(
        &self,
        auth: &AuthCredentials,
        environment_role: &EnvironmentRole,
        csp_role_id: &str,
    ) -> CspResult<String> {
        self.authorize(auth).await?;

        let env_identifier = self
            .state()
            .roles
            .get(csp_role_id)
            .cloned()
            .ok_or_else(|| {
                CspError::user_provisioning(
                    &environment_role.environment_id,
                    environment_role.user_identifier(),
                    format!("unknown role id {}", csp_role_id),
                )
            })?;

        self.delay().await;
        self.maybe_network_failure()?;
        self.maybe_raise(ATAT_ADMIN_CREATE_FAILURE_PCT, || {
            CspError::user_provisioning(&env_identifier, environment_role.user_identifier(), "Could not create user.")
        })?;

        if let Some(csp_user_id) = &environment_role.csp_user_id {
            let mut state = self.state();
            return match state.users.get_mut(csp_user_id) {
                Some(user) if !user.deleted => {
                    debug!("Mock provider moving user {} to role {}", csp_user_id, csp_role_id);
                    user.role_id = csp_role_id.to_string();
                    user.suspended = false;
                    Ok(csp_user_id.clone())
                }
                _ => Err(CspError::user_provisioning(&env_identifier, csp_user_id, "unknown or deleted user")),
            };
        }

        let csp_user_id = self.new_id();
        self.state().users.insert(
            csp_user_id.clone(),
            MockUser {
                env_identifier,
                role_id: csp_role_id.to_string(),
                suspended: false,
                deleted: false,
            },
        );
        Ok(csp_user_id)
    }

    async fn suspend_user(&self, auth: &AuthCredentials, csp_user_id: &str) -> CspResult<bool> {
        self.authorize(auth).await?;
        self.maybe_network_failure()?;

        let mut state = self.state();
        let user = state
            .users
            .get_mut(csp_user_id)
            .ok_or_else(|| CspError::user_removal(UNKNOWN_ENVIRONMENT, csp_user_id, "unknown user"))?;
        if user.deleted {
            return Err(CspError::user_removal(&user.env_identifier, csp_user_id, "user was deleted"));
        }
        let env_identifier = user.env_identifier.clone();
        drop(state);

        self.maybe_raise(USER_REMOVAL_FAILURE_PCT, || {
            CspError::user_removal(&env_identifier, csp_user_id, "Could not suspend user.")
        })?;

        if let Some(user) = self.state().users.get_mut(csp_user_id) {
            user.suspended = true;
        }
        Ok(true)
    }

    async fn delete_user(&self, auth: &AuthCredentials, csp_user_id: &str) -> CspResult<bool> {
        self.authorize(auth).await?;
        self.maybe_network_failure()?;

        let env_identifier = self
            .state()
            .users
            .get(csp_user_id)
            .map(|user| user.env_identifier.clone())
            .ok_or_else(|| CspError::user_removal(UNKNOWN_ENVIRONMENT, csp_user_id, "unknown user"))?;

        self.maybe_raise(USER_REMOVAL_FAILURE_PCT, || {
            CspError::user_removal(&env_identifier, csp_user_id, "Could not remove user.")
        })?;

        if let Some(user) = self.state().users.get_mut(csp_user_id) {
            user.suspended = true;
            user.deleted = true;
        }
        Ok(true)
    }

    async fn find_environment(
        &self,
        auth: &AuthCredentials,
        environment: &Environment,
    ) -> CspResult<Option<String>> {
        self.authorize(auth).await?;
        self.maybe_network_failure()?;
        Ok(self.state().environments.get(&environment.id).cloned())
    }

    fn calculator_url(&self) -> String {
        "https://www.rackspace.com/en-us/calculator".to_string()
    }

    fn environment_login_url(&self, _environment: &Environment) -> String {
        "https://www.mycloud.com/my-env-login".to_string()
    }
}
