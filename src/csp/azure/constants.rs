//! Endpoints, API versions and built-in role names for Azure

use crate::csp::models::CspRole;

pub const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com";
pub const DEFAULT_MANAGEMENT_URL: &str = "https://management.azure.com";
pub const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com";

pub const MANAGEMENT_GROUP_API_VERSION: &str = "2020-05-01";
pub const AUTHORIZATION_API_VERSION: &str = "2022-04-01";
pub const GRAPH_VERSION: &str = "v1.0";

pub const CALCULATOR_URL: &str = "https://azure.microsoft.com/en-us/pricing/calculator/";
pub const PORTAL_URL: &str = "https://portal.azure.com";

/// Built-in "Owner" role definition, granted to the admin service principal
pub const OWNER_ROLE_DEFINITION: &str = "8e3af657-a8ff-443c-a75c-2fe8c4bcb635";

const ROLE_DEFINITIONS_SEGMENT: &str = "/providers/Microsoft.Authorization/roleDefinitions/";

/// Built-in role backing each baseline role kind
pub fn built_in_role_name(role: CspRole) -> &'static str {
    match role {
        CspRole::BasicAccess => "Contributor",
        CspRole::NetworkAdmin => "Network Contributor",
        CspRole::BusinessRead => "Billing Reader",
        CspRole::TechnicalRead => "Reader",
    }
}

pub fn token_endpoint(authority_url: &str, tenant_id: &str) -> String {
    format!("{}/{}/oauth2/token", authority_url, tenant_id)
}

/// Resource id of a management group, which is what an environment maps to
pub fn management_group_id(group_name: &str) -> String {
    format!("/providers/Microsoft.Management/managementGroups/{}", group_name)
}

pub fn management_group_endpoint(management_url: &str, group_name: &str) -> String {
    format!(
        "{}{}?api-version={}",
        management_url,
        management_group_id(group_name),
        MANAGEMENT_GROUP_API_VERSION
    )
}

pub fn role_definitions_endpoint(management_url: &str, scope: &str) -> String {
    format!(
        "{}{}/providers/Microsoft.Authorization/roleDefinitions?api-version={}",
        management_url, scope, AUTHORIZATION_API_VERSION
    )
}

pub fn role_definition_id(scope: &str, definition: &str) -> String {
    format!("{}{}{}", scope, ROLE_DEFINITIONS_SEGMENT, definition)
}

/// Scope a fully qualified role definition id lives under
pub fn scope_of_role_definition(role_definition_id: &str) -> Option<&str> {
    role_definition_id
        .split_once(ROLE_DEFINITIONS_SEGMENT)
        .map(|(scope, _)| scope)
        .filter(|scope| !scope.is_empty())
}

pub fn role_assignments_endpoint(management_url: &str, scope: &str) -> String {
    format!(
        "{}{}/providers/Microsoft.Authorization/roleAssignments?api-version={}",
        management_url, scope, AUTHORIZATION_API_VERSION
    )
}

pub fn role_assignment_endpoint(management_url: &str, scope: &str, assignment: &str) -> String {
    format!(
        "{}{}/providers/Microsoft.Authorization/roleAssignments/{}?api-version={}",
        management_url, scope, assignment, AUTHORIZATION_API_VERSION
    )
}

/// Role assignment given by full resource id
pub fn resource_endpoint(management_url: &str, resource_id: &str) -> String {
    format!("{}{}?api-version={}", management_url, resource_id, AUTHORIZATION_API_VERSION)
}

pub fn graph_endpoint(graph_url: &str, path: &str) -> String {
    format!("{}/{}/{}", graph_url, GRAPH_VERSION, path.trim_start_matches('/'))
}

/// Management group names allow letters, digits, `-`, `_`, `(`, `)` and `.`, up to 90 chars
pub fn management_group_name(environment_id: &str) -> String {
    environment_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || "-_().".contains(c) { c } else { '-' })
        .take(90)
        .collect()
}
