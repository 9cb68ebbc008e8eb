//! Shared fixtures: sample records and a provider double with scripted failures

#![allow(dead_code)]

use async_trait::async_trait;
use csp_provisioner::csp::{
    AdminUser, AuthCredentials, BaselineRoleMap, CloudProvider, CspError, CspResult, Environment, EnvironmentRole,
    MockCloudProvider, MockConfig, User,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

pub fn user(id: &str) -> User {
    User {
        id: id.to_string(),
        first_name: "Grace".to_string(),
        last_name: "Hopper".to_string(),
        email: format!("{}@example.mil", id),
        phone_number: Some("555-0100".to_string()),
        dod_id: None,
    }
}

pub fn environment(id: &str) -> Environment {
    Environment::new(id, "dev", "billing", "finance")
}

pub fn reliable_mock() -> MockCloudProvider {
    MockCloudProvider::seeded(MockConfig::reliable(), 7)
}

/// Wraps a reliable mock; queued errors are returned before delegating
#[derive(Default)]
pub struct ScriptedProvider {
    inner: Option<MockCloudProvider>,
    scripted: Mutex<HashMap<&'static str, VecDeque<CspError>>>,
    failing_users: Mutex<HashMap<String, CspError>>,
    hanging: Mutex<HashSet<&'static str>>,
    slow: Mutex<HashMap<&'static str, Duration>>,
    calls: Mutex<HashMap<&'static str, u32>>,
    users_in_flight: AtomicU32,
    peak_users_in_flight: AtomicU32,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            inner: Some(reliable_mock()),
            ..Default::default()
        }
    }

    pub fn mock(&self) -> &MockCloudProvider {
        self.inner.as_ref().unwrap()
    }

    /// Fail the next `times` calls of `operation` with `error`
    pub fn fail(&self, operation: &'static str, error: CspError, times: usize) {
        let mut scripted = self.scripted.lock().unwrap();
        let queue = scripted.entry(operation).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Every create_or_update_user for this portal user fails
    pub fn fail_user(&self, user_id: &str, error: CspError) {
        self.failing_users.lock().unwrap().insert(user_id.to_string(), error);
    }

    /// Calls of `operation` never complete
    pub fn hang(&self, operation: &'static str) {
        self.hanging.lock().unwrap().insert(operation);
    }

    /// Calls of `operation` take `delay` before running
    pub fn slow(&self, operation: &'static str, delay: Duration) {
        self.slow.lock().unwrap().insert(operation, delay);
    }

    pub fn calls(&self, operation: &str) -> u32 {
        self.calls.lock().unwrap().get(operation).copied().unwrap_or(0)
    }

    /// Most create_or_update_user calls ever running at once
    pub fn peak_users_in_flight(&self) -> u32 {
        self.peak_users_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, operation: &'static str) -> CspResult<()> {
        *self.calls.lock().unwrap().entry(operation).or_insert(0) += 1;

        let delay = self.slow.lock().unwrap().get(operation).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let hangs = self.hanging.lock().unwrap().contains(operation);
        if hangs {
            std::future::pending::<()>().await;
        }

        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(operation)
            .and_then(|queue| queue.pop_front());
        match scripted {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CloudProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn root_credentials(&self) -> AuthCredentials {
        self.mock().root_credentials()
    }

    async fn create_environment(
        &self,
        auth: &AuthCredentials,
        user: &User,
        environment: &Environment,
    ) -> CspResult<String> {
        self.enter("create_environment").await?;
        self.mock().create_environment(auth, user, environment).await
    }

    async fn create_atat_admin_user(&self, auth: &AuthCredentials, csp_environment_id: &str) -> CspResult<AdminUser> {
        self.enter("create_atat_admin_user").await?;
        self.mock().create_atat_admin_user(auth, csp_environment_id).await
    }

    async fn create_environment_baseline(
        &self,
        auth: &AuthCredentials,
        csp_environment_id: &str,
    ) -> CspResult<BaselineRoleMap> {
        self.enter("create_environment_baseline").await?;
        self.mock().create_environment_baseline(auth, csp_environment_id).await
    }

    async fn create_or_update_user(
        &self,
        auth: &AuthCredentials,
        environment_role: &EnvironmentRole,
        csp_role_id: &str,
    ) -> CspResult<String> {
        let running = self.users_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_users_in_flight.fetch_max(running, Ordering::SeqCst);

        let result = async {
            self.enter("create_or_update_user").await?;
            let failing = self.failing_users.lock().unwrap().get(&environment_role.user.id).cloned();
            if let Some(error) = failing {
                return Err(error);
            }
            self.mock().create_or_update_user(auth, environment_role, csp_role_id).await
        }
        .await;

        self.users_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn suspend_user(&self, auth: &AuthCredentials, csp_user_id: &str) -> CspResult<bool> {
        self.enter("suspend_user").await?;
        self.mock().suspend_user(auth, csp_user_id).await
    }

    async fn delete_user(&self, auth: &AuthCredentials, csp_user_id: &str) -> CspResult<bool> {
        self.enter("delete_user").await?;
        self.mock().delete_user(auth, csp_user_id).await
    }

    async fn find_environment(&self, auth: &AuthCredentials, environment: &Environment) -> CspResult<Option<String>> {
        self.enter("find_environment").await?;
        self.mock().find_environment(auth, environment).await
    }

    fn calculator_url(&self) -> String {
        self.mock().calculator_url()
    }

    fn environment_login_url(&self, environment: &Environment) -> String {
        self.mock().environment_login_url(environment)
    }
}
