//! The contract every cloud provider backend implements
//!
//! Operations are listed in the order a new environment needs them:
//! environment, admin user, baseline, then users. Each returns a provider
//! assigned identifier or a structured result and fails with a single
//! [`CspError`] variant.

use async_trait::async_trait;
use std::time::Duration;

use super::error::CspResult;
use super::models::{AdminUser, AuthCredentials, BaselineRoleMap, Environment, EnvironmentRole, User};

#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Short backend name for logs and metrics
    fn name(&self) -> &'static str;

    /// Credentials this provider was configured with
    fn root_credentials(&self) -> AuthCredentials;

    /// Create a new environment in the CSP, returning its CSP id
    ///
    /// Must not be called more than once per environment. A second call
    /// fails with `EnvironmentExists` rather than returning a stale id.
    ///
    /// Errors: `Authentication`, `Authorization`, `Connection`,
    /// `UnknownServer`, `EnvironmentExists`, `OperationInProgress`,
    /// `EnvironmentCreation`.
    async fn create_environment(
        &self,
        auth: &AuthCredentials,
        user: &User,
        environment: &Environment,
    ) -> CspResult<String>;

    /// Create a programmatic administrator with full rights over the environment
    ///
    /// Errors: `Authentication`, `Authorization`, `Connection`,
    /// `UnknownServer`, `UserProvisioning`.
    async fn create_atat_admin_user(
        &self,
        auth: &AuthCredentials,
        csp_environment_id: &str,
    ) -> CspResult<AdminUser>;

    /// Provision the baseline roles inside the environment
    ///
    /// Either every role kind is mapped or the call fails; partial maps are
    /// never returned.
    ///
    /// Errors: `Authentication`, `Authorization`, `Connection`,
    /// `UnknownServer`, `BaselineProvision`.
    async fn create_environment_baseline(
        &self,
        auth: &AuthCredentials,
        csp_environment_id: &str,
    ) -> CspResult<BaselineRoleMap>;

    /// Create a user, or change the role of the user already named by
    /// `environment_role.csp_user_id`, returning the CSP user id
    ///
    /// Errors: `Authentication`, `Authorization`, `Connection`,
    /// `UnknownServer`, `UserProvisioning`.
    async fn create_or_update_user(
        &self,
        auth: &AuthCredentials,
        environment_role: &EnvironmentRole,
        csp_role_id: &str,
    ) -> CspResult<String>;

    /// Revoke every privilege without deleting the identity
    ///
    /// Errors: `Authentication`, `Authorization`, `Connection`,
    /// `UnknownServer`, `UserRemoval`.
    async fn suspend_user(&self, auth: &AuthCredentials, csp_user_id: &str) -> CspResult<bool>;

    /// Start (possibly asynchronous) permanent removal of the user
    ///
    /// Errors: `Authentication`, `Authorization`, `Connection`,
    /// `UnknownServer`, `UserRemoval`.
    async fn delete_user(&self, auth: &AuthCredentials, csp_user_id: &str) -> CspResult<bool>;

    /// Look up the CSP id of an environment that was already created
    async fn find_environment(
        &self,
        auth: &AuthCredentials,
        environment: &Environment,
    ) -> CspResult<Option<String>>;

    fn calculator_url(&self) -> String;

    fn environment_login_url(&self, environment: &Environment) -> String;

    /// Total time requests have spent waiting on client-side rate limiting
    fn rate_limit_wait(&self) -> Duration {
        Duration::ZERO
    }
}
