//! Azure backend: environments are management groups, users are Entra ID
//! directory users, and roles are built-in role definitions assigned at the
//! management group scope.

pub mod auth;
pub mod client;
pub mod constants;

use async_trait::async_trait;
use log::{debug, info, warn};
use rand::Rng;
use rand::distributions::Alphanumeric;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use self::auth::TokenProvider;
use self::client::{AzureHttp, AzureResponse, classify};
use super::error::{CspError, CspResult, UNKNOWN_ENVIRONMENT};
use super::models::{AdminUser, AuthCredentials, BaselineRoleMap, CspRole, Environment, EnvironmentRole, User};
use super::provider::CloudProvider;
use super::resilience::retry::millis;
use super::resilience::{RateLimitConfig, RateLimiter};

/// Identifier used for the admin principal in error messages
const ATAT_ADMIN: &str = "atat-admin";

/// New principals take a moment to replicate before they can be assigned roles
const PRINCIPAL_REPLICATION_ATTEMPTS: u32 = 5;
const PRINCIPAL_REPLICATION_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    pub client_id: String,
    pub secret_key: String,
    pub tenant_id: String,
    /// Domain used for new users' principal names
    pub user_domain: String,
    pub authority_url: String,
    pub management_url: String,
    pub graph_url: String,
    #[serde(with = "millis")]
    pub request_timeout: Duration,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            secret_key: String::new(),
            tenant_id: String::new(),
            user_domain: String::new(),
            authority_url: constants::DEFAULT_AUTHORITY_URL.to_string(),
            management_url: constants::DEFAULT_MANAGEMENT_URL.to_string(),
            graph_url: constants::DEFAULT_GRAPH_URL.to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureConfig")
            .field("client_id", &self.client_id)
            .field("secret_key", &"[REDACTED]")
            .field("tenant_id", &self.tenant_id)
            .field("user_domain", &self.user_domain)
            .field("authority_url", &self.authority_url)
            .field("management_url", &self.management_url)
            .field("graph_url", &self.graph_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl AzureConfig {
    pub fn is_complete(&self) -> bool {
        !self.client_id.is_empty() && !self.secret_key.is_empty() && !self.tenant_id.is_empty()
    }

    pub fn credentials(&self) -> AuthCredentials {
        AuthCredentials::new()
            .with("client_id", &self.client_id)
            .with("secret_key", &self.secret_key)
            .with("tenant_id", &self.tenant_id)
    }

    /// Token audience for the management API
    fn management_resource(&self) -> String {
        format!("{}/", self.management_url.trim_end_matches('/'))
    }
}

pub struct AzureCloudProvider {
    config: AzureConfig,
    http: AzureHttp,
    tokens: TokenProvider,
}

impl AzureCloudProvider {
    pub fn new(config: AzureConfig, rate_limit: RateLimitConfig) -> CspResult<Self> {
        let http_client = AzureHttp::build_client(config.request_timeout)?;
        Ok(Self {
            tokens: TokenProvider::new(http_client.clone(), config.authority_url.clone()),
            http: AzureHttp::new(http_client, RateLimiter::new(rate_limit)),
            config,
        })
    }

    pub fn config(&self) -> &AzureConfig {
        &self.config
    }

    async fn management_token(&self, auth: &AuthCredentials) -> CspResult<String> {
        self.tokens.token(auth, &self.config.management_resource()).await
    }

    async fn graph_token(&self, auth: &AuthCredentials) -> CspResult<String> {
        self.tokens.token(auth, &self.config.graph_url).await
    }

    fn graph_url(&self, path: &str) -> String {
        constants::graph_endpoint(&self.config.graph_url, path)
    }

    async fn get_management_group(
        &self,
        token: &str,
        group_name: &str,
        fail: impl FnOnce(String) -> CspError,
    ) -> CspResult<Option<String>> {
        let url = constants::management_group_endpoint(&self.config.management_url, group_name);
        let response = self.http.send(self.http.client().get(url), token).await?;

        match response.status {
            status if status.is_success() => Ok(Some(
                response
                    .field("id")
                    .map(str::to_string)
                    .unwrap_or_else(|| constants::management_group_id(group_name)),
            )),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(classify(&response, fail)),
        }
    }

    async fn post_graph(
        &self,
        token: &str,
        path: &str,
        body: &Value,
        fail: impl Fn(String) -> CspError,
    ) -> CspResult<AzureResponse> {
        let response = self
            .http
            .send(self.http.client().post(self.graph_url(path)).json(body), token)
            .await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(classify(&response, fail))
        }
    }

    /// Assign `role_definition_id` to a principal at `scope`; an existing
    /// identical assignment counts as success
    async fn assign_role(
        &self,
        token: &str,
        scope: &str,
        role_definition_id: &str,
        principal_id: &str,
        principal_type: &str,
        fail: impl Fn(String) -> CspError,
    ) -> CspResult<()> {
        let body = json!({
            "properties": {
                "roleDefinitionId": role_definition_id,
                "principalId": principal_id,
                "principalType": principal_type,
            }
        });

        let mut attempt = 1;
        loop {
            let assignment = uuid::Uuid::new_v4().to_string();
            let url = constants::role_assignment_endpoint(&self.config.management_url, scope, &assignment);
            let response = self.http.send(self.http.client().put(url).json(&body), token).await?;

            if response.is_success() {
                debug!("Assigned {} to {} at {}", role_definition_id, principal_id, scope);
                return Ok(());
            }
            match response.error_code() {
                Some("RoleAssignmentExists") => return Ok(()),
                Some("PrincipalNotFound") if attempt < PRINCIPAL_REPLICATION_ATTEMPTS => {
                    debug!("Principal {} not replicated yet (attempt {})", principal_id, attempt);
                    tokio::time::sleep(PRINCIPAL_REPLICATION_DELAY).await;
                    attempt += 1;
                }
                _ => return Err(classify(&response, &fail)),
            }
        }
    }

    /// Drop assignments the principal holds at `scope` for any other role
    async fn remove_other_assignments(
        &self,
        token: &str,
        scope: &str,
        principal_id: &str,
        keep_role_definition_id: &str,
        fail: impl Fn(String) -> CspError,
    ) -> CspResult<()> {
        let request = self
            .http
            .client()
            .get(constants::role_assignments_endpoint(&self.config.management_url, scope))
            .query(&[("$filter", format!("principalId eq '{}'", principal_id))]);
        let response = self.http.send(request, token).await?;
        if !response.is_success() {
            return Err(classify(&response, &fail));
        }

        let keep = last_segment(keep_role_definition_id);
        let stale = response.body["value"]
            .as_array()
            .into_iter()
            .flatten()
            .filter(|assignment| {
                assignment["properties"]["roleDefinitionId"]
                    .as_str()
                    .is_some_and(|definition| !last_segment(definition).eq_ignore_ascii_case(keep))
            })
            .filter_map(|assignment| assignment["id"].as_str());

        for assignment_id in stale {
            info!("Removing stale role assignment {}", assignment_id);
            let url = constants::resource_endpoint(&self.config.management_url, assignment_id);
            let response = self.http.send(self.http.client().delete(url), token).await?;
            if !response.is_success() && response.status != StatusCode::NOT_FOUND {
                return Err(classify(&response, &fail));
            }
        }
        Ok(())
    }

    async fn create_directory_user(
        &self,
        auth: &AuthCredentials,
        user: &User,
        fail: impl Fn(String) -> CspError,
    ) -> CspResult<String> {
        let token = self.graph_token(auth).await?;
        let nickname = mail_nickname(user);

        let mut body = json!({
            "accountEnabled": true,
            "displayName": user.full_name(),
            "givenName": user.first_name,
            "surname": user.last_name,
            "mailNickname": nickname,
            "userPrincipalName": format!("{}@{}", nickname, self.config.user_domain),
            "otherMails": [user.email],
            "passwordProfile": {
                "forceChangePasswordNextSignIn": true,
                "password": temporary_password(),
            },
        });
        if let Some(phone) = &user.phone_number {
            body["mobilePhone"] = Value::from(phone.as_str());
        }
        if let Some(dod_id) = &user.dod_id {
            body["employeeId"] = Value::from(dod_id.as_str());
        }

        let response = self.post_graph(&token, "users", &body, &fail).await?;
        required_field(&response, "id", &fail)
    }
}

#[async_trait]
impl CloudProvider for AzureCloudProvider {
    fn name(&self) -> &'static str {
        "azure"
    }

    fn root_credentials(&self) -> AuthCredentials {
        self.config.credentials()
    }

    async fn create_environment(
        &self,
        auth: &AuthCredentials,
        user: &User,
        environment: &Environment,
    ) -> CspResult<String> {
        let token = self.management_token(auth).await?;
        let tenant_id = auth.require("tenant_id")?;
        let group_name = constants::management_group_name(&environment.id);
        let fail = |reason: String| CspError::environment_creation(&environment.id, reason);

        if self.get_management_group(&token, &group_name, fail).await?.is_some() {
            return Err(CspError::environment_exists(&environment.id));
        }

        info!(
            "Creating management group {} for environment {} (requested by {})",
            group_name, environment.id, user.id
        );
        let body = json!({
            "properties": {
                "displayName": environment.display_name(),
                "details": {
                    "parent": { "id": constants::management_group_id(tenant_id) }
                }
            }
        });
        let url = constants::management_group_endpoint(&self.config.management_url, &group_name);
        let response = self.http.send(self.http.client().put(url).json(&body), &token).await?;

        match response.status {
            // 202 means creation continues asynchronously under the same id
            status if status.is_success() => Ok(constants::management_group_id(&group_name)),
            StatusCode::CONFLICT => Err(CspError::environment_exists(&environment.id)),
            _ => Err(classify(&response, fail)),
        }
    }

    async fn create_atat_admin_user(
        &self,
        auth: &AuthCredentials,
        csp_environment_id: &str,
    ) -> CspResult<AdminUser> {
        let graph = self.graph_token(auth).await?;
        let tenant_id = auth.require("tenant_id")?;
        let fail = |reason: String| CspError::user_provisioning(csp_environment_id, ATAT_ADMIN, reason);

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let application = self
            .post_graph(
                &graph,
                "applications",
                &json!({
                    "displayName": format!("{}-{}", ATAT_ADMIN, &suffix[..8]),
                    "signInAudience": "AzureADMyOrg",
                }),
                fail,
            )
            .await?;
        let application_object_id = required_field(&application, "id", fail)?;
        let app_id = required_field(&application, "appId", fail)?;

        let principal = self
            .post_graph(&graph, "servicePrincipals", &json!({ "appId": app_id }), fail)
            .await?;
        let principal_id = required_field(&principal, "id", fail)?;

        let password = self
            .post_graph(
                &graph,
                &format!("applications/{}/addPassword", application_object_id),
                &json!({ "passwordCredential": { "displayName": ATAT_ADMIN } }),
                fail,
            )
            .await?;
        let secret = required_field(&password, "secretText", fail)?;

        let management = self.management_token(auth).await?;
        let owner = constants::role_definition_id(csp_environment_id, constants::OWNER_ROLE_DEFINITION);
        self.assign_role(&management, csp_environment_id, &owner, &principal_id, "ServicePrincipal", fail)
            .await?;

        info!("Created admin principal {} for {}", principal_id, csp_environment_id);
        Ok(AdminUser {
            user_id: principal_id,
            credentials: AuthCredentials::new()
                .with("tenant_id", tenant_id)
                .with("client_id", app_id)
                .with("secret_key", secret),
        })
    }

    async fn create_environment_baseline(
        &self,
        auth: &AuthCredentials,
        csp_environment_id: &str,
    ) -> CspResult<BaselineRoleMap> {
        let token = self.management_token(auth).await?;
        let mut roles = BTreeMap::new();

        for role in CspRole::ALL {
            let role_name = constants::built_in_role_name(role);
            let request = self
                .http
                .client()
                .get(constants::role_definitions_endpoint(&self.config.management_url, csp_environment_id))
                .query(&[("$filter", format!("roleName eq '{}'", role_name))]);
            let response = self.http.send(request, &token).await?;
            if !response.is_success() {
                return Err(classify(&response, |reason| {
                    CspError::baseline_provision(csp_environment_id, reason)
                }));
            }

            // Built-in definitions come back tenant-scoped; rescope them to the environment
            let definition = response.body["value"]
                .as_array()
                .and_then(|definitions| definitions.first())
                .and_then(|definition| definition["name"].as_str())
                .ok_or_else(|| {
                    CspError::baseline_provision(
                        csp_environment_id,
                        format!("role definition '{}' not found", role_name),
                    )
                })?;

            roles.insert(role, constants::role_definition_id(csp_environment_id, definition));
        }

        BaselineRoleMap::new(csp_environment_id, roles)
    }

    async fn create_or_update_user(
        &self,
        auth: &AuthCredentials,
        environment_role: &EnvironmentRole,
        csp_role_id: &str,
    ) -> CspResult<String> {
        let env_identifier = environment_role.environment_id.as_str();
        let user_identifier = environment_role.user_identifier();
        let fail = |reason: String| CspError::user_provisioning(env_identifier, user_identifier, reason);

        let scope = constants::scope_of_role_definition(csp_role_id)
            .ok_or_else(|| fail(format!("malformed role definition id '{}'", csp_role_id)))?;

        let management = self.management_token(auth).await?;
        let user_id = match &environment_role.csp_user_id {
            Some(existing) => {
                self.remove_other_assignments(&management, scope, existing, csp_role_id, fail)
                    .await?;
                existing.clone()
            }
            None => self.create_directory_user(auth, &environment_role.user, fail).await?,
        };

        self.assign_role(&management, scope, csp_role_id, &user_id, "User", fail)
            .await?;
        Ok(user_id)
    }

    async fn suspend_user(&self, auth: &AuthCredentials, csp_user_id: &str) -> CspResult<bool> {
        let token = self.graph_token(auth).await?;
        let request = self
            .http
            .client()
            .patch(self.graph_url(&format!("users/{}", csp_user_id)))
            .json(&json!({ "accountEnabled": false }));
        let response = self.http.send(request, &token).await?;

        if response.is_success() {
            info!("Suspended user {}", csp_user_id);
            Ok(true)
        } else {
            Err(classify(&response, |reason| CspError::user_removal(UNKNOWN_ENVIRONMENT, csp_user_id, reason)))
        }
    }

    async fn delete_user(&self, auth: &AuthCredentials, csp_user_id: &str) -> CspResult<bool> {
        let token = self.graph_token(auth).await?;
        let request = self.http.client().delete(self.graph_url(&format!("users/{}", csp_user_id)));
        let response = self.http.send(request, &token).await?;

        if response.is_success() {
            info!("Deleted user {}", csp_user_id);
            Ok(true)
        } else {
            Err(classify(&response, |reason| CspError::user_removal(UNKNOWN_ENVIRONMENT, csp_user_id, reason)))
        }
    }

    async fn find_environment(
        &self,
        auth: &AuthCredentials,
        environment: &Environment,
    ) -> CspResult<Option<String>> {
        let token = self.management_token(auth).await?;
        let group_name = constants::management_group_name(&environment.id);
        self.get_management_group(&token, &group_name, |reason| CspError::general(reason))
            .await
    }

    fn calculator_url(&self) -> String {
        constants::CALCULATOR_URL.to_string()
    }

    fn environment_login_url(&self, environment: &Environment) -> String {
        match &environment.csp_id {
            Some(csp_id) => format!("{}/#@{}/resource{}", constants::PORTAL_URL, self.config.tenant_id, csp_id),
            None => {
                warn!("Environment {} has no CSP id yet", environment.id);
                format!("{}/#@{}", constants::PORTAL_URL, self.config.tenant_id)
            }
        }
    }

    fn rate_limit_wait(&self) -> Duration {
        self.http.rate_limiter_stats().total_wait
    }
}

fn required_field(response: &AzureResponse, name: &str, fail: impl Fn(String) -> CspError) -> CspResult<String> {
    response
        .field(name)
        .map(str::to_string)
        .ok_or_else(|| fail(format!("response is missing '{}'", name)))
}

fn last_segment(resource_id: &str) -> &str {
    resource_id.rsplit('/').next().unwrap_or(resource_id)
}

/// `first.last` reduced to characters Entra ID accepts in a mail nickname
fn mail_nickname(user: &User) -> String {
    let nickname: String = format!("{}.{}", user.first_name, user.last_name)
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.')
        .collect();
    let nickname = nickname.trim_matches('.');
    if nickname.is_empty() {
        user.id.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
    } else {
        nickname.to_string()
    }
}

/// Initial password; the user must change it on first sign-in
fn temporary_password() -> String {
    let body: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect();
    format!("{}!9aZ", body)
}
