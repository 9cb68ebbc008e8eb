use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::error::{CspError, CspResult};

/// Opaque provider-specific secrets (client id, secret key, tenant id, ...)
///
/// Owned by the caller and never persisted by this crate. `Debug` output
/// shows keys only.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthCredentials(BTreeMap<String, String>);

impl AuthCredentials {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    /// Fetch a required key or fail with an authentication error
    pub fn require(&self, key: &str) -> CspResult<&str> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CspError::authentication(format!("missing credential '{}'", key)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for AuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "[REDACTED]")))
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AuthCredentials {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Portal user on whose behalf provisioning happens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub dod_id: Option<String>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Permission level a user holds inside a provisioned environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CspRole {
    BasicAccess,
    NetworkAdmin,
    BusinessRead,
    TechnicalRead,
}

impl CspRole {
    pub const ALL: [CspRole; 4] = [
        CspRole::BasicAccess,
        CspRole::NetworkAdmin,
        CspRole::BusinessRead,
        CspRole::TechnicalRead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CspRole::BasicAccess => "BASIC_ACCESS",
            CspRole::NetworkAdmin => "NETWORK_ADMIN",
            CspRole::BusinessRead => "BUSINESS_READ",
            CspRole::TechnicalRead => "TECHNICAL_READ",
        }
    }
}

impl fmt::Display for CspRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CspRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CspRole::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown CSP role '{}'", s))
    }
}

/// Role kind → CSP-side role id, always covering every [`CspRole`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<CspRole, String>", into = "BTreeMap<CspRole, String>")]
pub struct BaselineRoleMap(BTreeMap<CspRole, String>);

impl BaselineRoleMap {
    /// Build a role map, rejecting anything short of all four role kinds
    pub fn new(env_identifier: &str, roles: BTreeMap<CspRole, String>) -> CspResult<Self> {
        let missing: Vec<&str> = CspRole::ALL
            .iter()
            .filter(|role| roles.get(role).is_none_or(|id| id.is_empty()))
            .map(|role| role.as_str())
            .collect();

        if !missing.is_empty() {
            return Err(CspError::baseline_provision(
                env_identifier,
                format!("missing role ids for {}", missing.join(", ")),
            ));
        }

        Ok(Self(roles))
    }

    pub fn role_id(&self, role: CspRole) -> &str {
        // Constructor guarantees every role is present
        self.0.get(&role).map(|s| s.as_str()).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CspRole, &str)> {
        self.0.iter().map(|(role, id)| (*role, id.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<BTreeMap<CspRole, String>> for BaselineRoleMap {
    type Error = CspError;

    fn try_from(roles: BTreeMap<CspRole, String>) -> Result<Self, Self::Error> {
        Self::new("unknown", roles)
    }
}

impl From<BaselineRoleMap> for BTreeMap<CspRole, String> {
    fn from(map: BaselineRoleMap) -> Self {
        map.0
    }
}

/// Programmatic administrator created inside a new environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminUser {
    pub user_id: String,
    /// Secret; only for calls made in this environment's admin context
    pub credentials: AuthCredentials,
}

/// A provisioning target within an application within a portfolio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Portal-side identifier, also the idempotency key for creation
    pub id: String,
    pub name: String,
    pub application_name: String,
    pub portfolio_name: String,
    #[serde(default)]
    pub csp_id: Option<String>,
    #[serde(default)]
    pub admin_user_id: Option<String>,
    #[serde(default)]
    pub baseline_roles: Option<BaselineRoleMap>,
}

impl Environment {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        application_name: impl Into<String>,
        portfolio_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            application_name: application_name.into(),
            portfolio_name: portfolio_name.into(),
            csp_id: None,
            admin_user_id: None,
            baseline_roles: None,
        }
    }

    pub fn is_provisioned(&self) -> bool {
        self.csp_id.is_some()
    }

    /// Display name used on the provider side
    pub fn display_name(&self) -> String {
        format!("{} / {} / {}", self.portfolio_name, self.application_name, self.name)
    }
}

/// Provider-side user lifecycle as mirrored on the portal record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleStatus {
    Pending,
    Active,
    Suspended,
    Removed,
    Failed,
}

/// Binding of a user to an environment with a CSP permission level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRole {
    pub environment_id: String,
    pub user: User,
    pub role: CspRole,
    #[serde(default)]
    pub csp_user_id: Option<String>,
    pub status: RoleStatus,
}

impl EnvironmentRole {
    pub fn new(environment_id: impl Into<String>, user: User, role: CspRole) -> Self {
        Self {
            environment_id: environment_id.into(),
            user,
            role,
            csp_user_id: None,
            status: RoleStatus::Pending,
        }
    }

    /// Identifier used in error messages: the CSP id when known, else the portal user id
    pub fn user_identifier(&self) -> &str {
        self.csp_user_id.as_deref().unwrap_or(&self.user.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_roles() -> BTreeMap<CspRole, String> {
        CspRole::ALL
            .iter()
            .map(|role| (*role, format!("{}-id", role.as_str().to_lowercase())))
            .collect()
    }

    #[test]
    fn test_role_map_requires_all_roles() {
        let mut roles = full_roles();
        assert_eq!(BaselineRoleMap::new("env-1", roles.clone()).unwrap().len(), 4);

        roles.remove(&CspRole::NetworkAdmin);
        let err = BaselineRoleMap::new("env-1", roles).unwrap_err();
        assert!(matches!(err, CspError::BaselineProvision { .. }));
        assert!(err.message().contains("NETWORK_ADMIN"));
    }

    #[test]
    fn test_role_map_rejects_empty_ids() {
        let mut roles = full_roles();
        roles.insert(CspRole::BusinessRead, String::new());
        assert!(BaselineRoleMap::new("env-1", roles).is_err());
    }

    #[test]
    fn test_role_map_serde_rejects_partial() {
        let map = BaselineRoleMap::new("env-1", full_roles()).unwrap();
        let json = serde_json::to_string(&map).unwrap();
        assert!(json.contains("BASIC_ACCESS"));
        let back: BaselineRoleMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);

        let partial = r#"{"BASIC_ACCESS":"a","NETWORK_ADMIN":"b"}"#;
        assert!(serde_json::from_str::<BaselineRoleMap>(partial).is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_values() {
        let creds = AuthCredentials::new()
            .with("client_id", "abc")
            .with("secret_key", "hunter2");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("secret_key"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_credentials_require() {
        let creds = AuthCredentials::new().with("tenant_id", "");
        assert!(matches!(creds.require("tenant_id"), Err(CspError::Authentication { .. })));
        assert!(matches!(creds.require("client_id"), Err(CspError::Authentication { .. })));
    }

    #[test]
    fn test_csp_role_parse() {
        assert_eq!("basic_access".parse::<CspRole>(), Ok(CspRole::BasicAccess));
        assert_eq!("TECHNICAL_READ".parse::<CspRole>(), Ok(CspRole::TechnicalRead));
        assert!("owner".parse::<CspRole>().is_err());
    }
}
