//! Azure backend against a local HTTP double

mod common;

use common::{environment, user};
use csp_provisioner::csp::resilience::RateLimitConfig;
use csp_provisioner::csp::{
    AuthCredentials, AzureCloudProvider, AzureConfig, CloudProvider, CspError, CspRole, EnvironmentRole,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TENANT: &str = "tenant-1";
const GROUP_PATH: &str = "/providers/Microsoft.Management/managementGroups/env-1";

fn provider_for(server: &MockServer) -> AzureCloudProvider {
    let config = AzureConfig {
        client_id: "client-1".to_string(),
        secret_key: "secret-1".to_string(),
        tenant_id: TENANT.to_string(),
        user_domain: "example.onmicrosoft.com".to_string(),
        authority_url: server.uri(),
        management_url: server.uri(),
        graph_url: server.uri(),
        ..AzureConfig::default()
    };
    let rate_limit = RateLimitConfig {
        enabled: false,
        ..RateLimitConfig::default()
    };
    AzureCloudProvider::new(config, rate_limit).unwrap()
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/{}/oauth2/token", TENANT)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "expires_in": "3599",
            "access_token": "test-token"
        })))
        .mount(server)
        .await;
}

fn role_path(kind: &str) -> String {
    format!("{}/providers/Microsoft.Authorization/{}", GROUP_PATH, kind)
}

fn assignment_put() -> wiremock::MockBuilder {
    Mock::given(method("PUT")).and(path_regex(
        r"^/providers/Microsoft\.Management/managementGroups/env-1/providers/Microsoft\.Authorization/roleAssignments/[0-9a-f-]+$",
    ))
}

fn reader_role_id() -> String {
    format!("{}/guid-reader", role_path("roleDefinitions"))
}

#[tokio::test]
async fn test_create_environment_puts_management_group() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path(GROUP_PATH))
        .and(query_param("api-version", "2020-05-01"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(GROUP_PATH))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "properties": {
                "details": { "parent": { "id": "/providers/Microsoft.Management/managementGroups/tenant-1" } }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": GROUP_PATH })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let auth = provider.root_credentials();
    let csp_id = provider
        .create_environment(&auth, &user("creator"), &environment("env-1"))
        .await
        .unwrap();

    assert_eq!(csp_id, GROUP_PATH);
}

#[tokio::test]
async fn test_existing_management_group_reports_exists() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path(GROUP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": GROUP_PATH })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(GROUP_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let error = provider
        .create_environment(&provider.root_credentials(), &user("creator"), &environment("env-1"))
        .await
        .unwrap_err();

    assert!(matches!(error, CspError::EnvironmentExists { .. }));
}

#[tokio::test]
async fn test_create_environment_status_mapping() {
    let cases = [
        (400, "environment_creation"),
        (401, "authentication"),
        (403, "authorization"),
        (409, "environment_exists"),
        (429, "unknown_server"),
        (500, "unknown_server"),
    ];

    for (status, expected) in cases {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": { "code": "SomethingWrong", "message": format!("status {}", status) }
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let error = provider
            .create_environment(&provider.root_credentials(), &user("creator"), &environment("env-1"))
            .await
            .unwrap_err();

        assert_eq!(error.label(), expected, "status {}", status);
    }
}

#[tokio::test]
async fn test_rejected_token_is_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/{}/oauth2/token", TENANT)))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "AADSTS7000215: Invalid client secret provided."
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let error = provider
        .find_environment(&provider.root_credentials(), &environment("env-1"))
        .await
        .unwrap_err();

    assert!(matches!(error, CspError::Authentication { .. }));
    assert!(error.message().contains("Invalid client secret"));
}

#[tokio::test]
async fn test_missing_credential_fields_fail_without_request() {
    let server = MockServer::start().await;
    let provider = provider_for(&server);
    let partial = AuthCredentials::new().with("tenant_id", TENANT);

    let error = provider.suspend_user(&partial, "u-1").await.unwrap_err();

    assert!(error.is_auth());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_token_is_cached_across_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/{}/oauth2/token", TENANT)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(GROUP_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let auth = provider.root_credentials();
    for _ in 0..3 {
        let found = provider.find_environment(&auth, &environment("env-1")).await.unwrap();
        assert_eq!(found, None);
    }
}

#[tokio::test]
async fn test_baseline_resolves_built_in_roles() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    for (role_name, guid) in [
        ("Contributor", "guid-contributor"),
        ("Network Contributor", "guid-network"),
        ("Billing Reader", "guid-billing"),
        ("Reader", "guid-reader"),
    ] {
        Mock::given(method("GET"))
            .and(path(role_path("roleDefinitions")))
            .and(query_param("$filter", format!("roleName eq '{}'", role_name)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{
                    "id": format!("/providers/Microsoft.Authorization/roleDefinitions/{}", guid),
                    "name": guid,
                    "properties": { "roleName": role_name }
                }]
            })))
            .mount(&server)
            .await;
    }

    let provider = provider_for(&server);
    let roles = provider
        .create_environment_baseline(&provider.root_credentials(), GROUP_PATH)
        .await
        .unwrap();

    assert_eq!(roles.len(), 4);
    assert_eq!(roles.role_id(CspRole::TechnicalRead), reader_role_id());
    assert!(roles.role_id(CspRole::NetworkAdmin).ends_with("/guid-network"));
}

#[tokio::test]
async fn test_baseline_fails_when_role_missing() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path(role_path("roleDefinitions")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let error = provider
        .create_environment_baseline(&provider.root_credentials(), GROUP_PATH)
        .await
        .unwrap_err();

    assert!(matches!(error, CspError::BaselineProvision { .. }));
}

#[tokio::test]
async fn test_admin_user_creates_owner_service_principal() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1.0/applications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "app-object", "appId": "app-client" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1.0/servicePrincipals"))
        .and(body_partial_json(json!({ "appId": "app-client" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "sp-1" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1.0/applications/app-object/addPassword"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "secretText": "generated-secret" })))
        .mount(&server)
        .await;
    assignment_put()
        .and(body_partial_json(json!({
            "properties": { "principalId": "sp-1", "principalType": "ServicePrincipal" }
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let admin = provider
        .create_atat_admin_user(&provider.root_credentials(), GROUP_PATH)
        .await
        .unwrap();

    assert_eq!(admin.user_id, "sp-1");
    assert_eq!(admin.credentials.get("client_id"), Some("app-client"));
    assert_eq!(admin.credentials.get("secret_key"), Some("generated-secret"));
    assert_eq!(admin.credentials.get("tenant_id"), Some(TENANT));
}

#[tokio::test]
async fn test_new_user_is_created_and_assigned() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1.0/users"))
        .and(body_partial_json(json!({
            "userPrincipalName": "grace.hopper@example.onmicrosoft.com",
            "otherMails": ["u1@example.mil"]
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "user-object-1" })))
        .expect(1)
        .mount(&server)
        .await;
    assignment_put()
        .and(body_partial_json(json!({
            "properties": { "roleDefinitionId": reader_role_id(), "principalType": "User" }
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let role = EnvironmentRole::new("env-1", user("u1"), CspRole::TechnicalRead);
    let csp_user_id = provider
        .create_or_update_user(&provider.root_credentials(), &role, &reader_role_id())
        .await
        .unwrap();

    assert_eq!(csp_user_id, "user-object-1");
}

#[tokio::test]
async fn test_existing_assignment_counts_as_success() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1.0/users"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "user-object-1" })))
        .mount(&server)
        .await;
    assignment_put()
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": { "code": "RoleAssignmentExists", "message": "The role assignment already exists." }
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let role = EnvironmentRole::new("env-1", user("u1"), CspRole::TechnicalRead);
    let result = provider
        .create_or_update_user(&provider.root_credentials(), &role, &reader_role_id())
        .await;

    assert_eq!(result.unwrap(), "user-object-1");
}

#[tokio::test]
async fn test_role_change_replaces_other_assignments() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path(role_path("roleAssignments")))
        .and(query_param("$filter", "principalId eq 'user-object-1'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {
                    "id": format!("{}/stale-1", role_path("roleAssignments")),
                    "properties": {
                        "roleDefinitionId": "/providers/Microsoft.Authorization/roleDefinitions/guid-contributor"
                    }
                },
                {
                    "id": format!("{}/current-1", role_path("roleAssignments")),
                    "properties": {
                        "roleDefinitionId": "/providers/Microsoft.Authorization/roleDefinitions/guid-reader"
                    }
                }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("{}/stale-1", role_path("roleAssignments"))))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("{}/current-1", role_path("roleAssignments"))))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1.0/users"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;
    assignment_put()
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let mut role = EnvironmentRole::new("env-1", user("u1"), CspRole::TechnicalRead);
    role.csp_user_id = Some("user-object-1".to_string());
    let csp_user_id = provider
        .create_or_update_user(&provider.root_credentials(), &role, &reader_role_id())
        .await
        .unwrap();

    assert_eq!(csp_user_id, "user-object-1");
}

#[tokio::test]
async fn test_malformed_role_id_is_rejected_locally() {
    let server = MockServer::start().await;
    let provider = provider_for(&server);
    let role = EnvironmentRole::new("env-1", user("u1"), CspRole::BasicAccess);

    let error = provider
        .create_or_update_user(&provider.root_credentials(), &role, "not-a-role-id")
        .await
        .unwrap_err();

    assert!(matches!(error, CspError::UserProvisioning { .. }));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_suspend_and_delete_user() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("PATCH"))
        .and(path("/v1.0/users/user-object-1"))
        .and(body_partial_json(json!({ "accountEnabled": false })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/users/user-object-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let auth = provider.root_credentials();

    assert!(provider.suspend_user(&auth, "user-object-1").await.unwrap());
    assert!(provider.delete_user(&auth, "user-object-1").await.unwrap());
}

#[tokio::test]
async fn test_delete_unknown_user_is_removal_error() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/users/ghost"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": "Request_ResourceNotFound", "message": "Resource 'ghost' does not exist." }
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let error = provider
        .delete_user(&provider.root_credentials(), "ghost")
        .await
        .unwrap_err();

    assert!(matches!(error, CspError::UserRemoval { .. }));
    assert!(error.message().contains("does not exist"));
}

#[tokio::test]
async fn test_find_environment() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path(GROUP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": GROUP_PATH })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let auth = provider.root_credentials();

    assert_eq!(
        provider.find_environment(&auth, &environment("env-1")).await.unwrap(),
        Some(GROUP_PATH.to_string())
    );
    assert_eq!(provider.find_environment(&auth, &environment("env-2")).await.unwrap(), None);
}
