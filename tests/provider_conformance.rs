//! Behaviour every provider backend must show, checked against the mock

mod common;

use common::{environment, reliable_mock, user};
use csp_provisioner::csp::{
    AuthCredentials, CloudProvider, CspError, CspRole, EnvironmentRole, MockCloudProvider, MockConfig,
};
use std::collections::HashSet;
use std::time::Duration;

#[tokio::test]
async fn test_create_environment_twice_reports_exists() {
    let provider = reliable_mock();
    let auth = provider.root_credentials();
    let env = environment("env-1");

    provider.create_environment(&auth, &user("creator"), &env).await.unwrap();
    let error = provider
        .create_environment(&auth, &user("creator"), &env)
        .await
        .unwrap_err();

    assert!(matches!(error, CspError::EnvironmentExists { ref env_identifier } if env_identifier == "env-1"));
}

#[tokio::test]
async fn test_baseline_has_every_role_kind() {
    let provider = reliable_mock();
    let auth = provider.root_credentials();
    let csp_env = provider
        .create_environment(&auth, &user("creator"), &environment("env-1"))
        .await
        .unwrap();

    let roles = provider.create_environment_baseline(&auth, &csp_env).await.unwrap();

    assert_eq!(roles.len(), 4);
    let ids: HashSet<&str> = CspRole::ALL.iter().map(|role| roles.role_id(*role)).collect();
    assert_eq!(ids.len(), 4, "role ids must be distinct");
    assert!(ids.iter().all(|id| !id.is_empty()));
}

#[tokio::test]
async fn test_baseline_for_unknown_environment_fails() {
    let provider = reliable_mock();
    let error = provider
        .create_environment_baseline(&provider.root_credentials(), "no-such-env")
        .await
        .unwrap_err();
    assert!(matches!(error, CspError::BaselineProvision { .. }));
}

#[tokio::test]
async fn test_create_or_update_is_idempotent_on_user_id() {
    let provider = reliable_mock();
    let auth = provider.root_credentials();
    let csp_env = provider
        .create_environment(&auth, &user("creator"), &environment("env-1"))
        .await
        .unwrap();
    let roles = provider.create_environment_baseline(&auth, &csp_env).await.unwrap();

    let mut role = EnvironmentRole::new("env-1", user("u1"), CspRole::BusinessRead);
    let first = provider
        .create_or_update_user(&auth, &role, roles.role_id(CspRole::BusinessRead))
        .await
        .unwrap();
    role.csp_user_id = Some(first.clone());
    let second = provider
        .create_or_update_user(&auth, &role, roles.role_id(CspRole::BusinessRead))
        .await
        .unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_wrong_credentials_fail_every_operation() {
    let provider = reliable_mock();
    let wrong = AuthCredentials::new().with("username", "someone").with("pass", "guess");
    let role = EnvironmentRole::new("env-1", user("u1"), CspRole::BasicAccess);

    let results = vec![
        provider
            .create_environment(&wrong, &user("creator"), &environment("env-1"))
            .await
            .map(|_| ()),
        provider.create_atat_admin_user(&wrong, "x").await.map(|_| ()),
        provider.create_environment_baseline(&wrong, "x").await.map(|_| ()),
        provider.create_or_update_user(&wrong, &role, "x").await.map(|_| ()),
        provider.suspend_user(&wrong, "x").await.map(|_| ()),
        provider.delete_user(&wrong, "x").await.map(|_| ()),
    ];

    for result in results {
        assert!(matches!(result, Err(CspError::Authentication { .. })), "{:?}", result);
    }

    // The rejected create left nothing behind
    let auth = provider.root_credentials();
    assert_eq!(provider.find_environment(&auth, &environment("env-1")).await.unwrap(), None);
}

#[tokio::test]
async fn test_reliable_mock_never_fails() {
    let provider = MockCloudProvider::seeded(MockConfig::reliable(), 1234);
    let auth = provider.root_credentials();

    for i in 0..25 {
        let env_id = format!("env-{}", i);
        let csp_env = provider
            .create_environment(&auth, &user("creator"), &environment(&env_id))
            .await
            .unwrap();
        provider.create_atat_admin_user(&auth, &csp_env).await.unwrap();
        let roles = provider.create_environment_baseline(&auth, &csp_env).await.unwrap();

        let role = EnvironmentRole::new(env_id.as_str(), user(&format!("u{}", i)), CspRole::TechnicalRead);
        let csp_user = provider
            .create_or_update_user(&auth, &role, roles.role_id(CspRole::TechnicalRead))
            .await
            .unwrap();
        assert!(provider.suspend_user(&auth, &csp_user).await.unwrap());
        assert!(provider.delete_user(&auth, &csp_user).await.unwrap());
    }
}

#[tokio::test]
async fn test_same_seed_replays_same_failures() {
    let config = MockConfig {
        with_delay: false,
        with_failure: true,
        delay_unit: Duration::ZERO,
    };

    let mut sequences = Vec::new();
    for _ in 0..2 {
        let provider = MockCloudProvider::seeded(config.clone(), 99);
        let auth = provider.root_credentials();
        let mut sequence = Vec::new();
        for i in 0..30 {
            let result = provider
                .create_environment(&auth, &user("creator"), &environment(&format!("env-{}", i)))
                .await;
            sequence.push(result.map_err(|e| e.label()));
        }
        sequences.push(sequence);
    }

    assert_eq!(sequences[0], sequences[1]);
}

#[tokio::test]
async fn test_full_scenario() {
    let provider = reliable_mock();
    let auth = provider.root_credentials();

    let csp_env = provider
        .create_environment(&auth, &user("creator"), &environment("E1"))
        .await
        .unwrap();
    assert!(!csp_env.is_empty());

    let admin = provider.create_atat_admin_user(&auth, &csp_env).await.unwrap();
    assert!(!admin.user_id.is_empty());
    assert!(!admin.credentials.is_empty());

    let roles = provider
        .create_environment_baseline(&admin.credentials, &csp_env)
        .await
        .unwrap();
    assert_eq!(roles.len(), 4);

    let role = EnvironmentRole::new("E1", user("U1"), CspRole::BasicAccess);
    let csp_user = provider
        .create_or_update_user(&admin.credentials, &role, roles.role_id(CspRole::BasicAccess))
        .await
        .unwrap();
    assert!(!csp_user.is_empty());

    assert!(provider.suspend_user(&admin.credentials, &csp_user).await.unwrap());
    assert!(provider.delete_user(&admin.credentials, &csp_user).await.unwrap());
}

#[tokio::test]
async fn test_urls_are_present() {
    let provider = reliable_mock();
    assert!(provider.calculator_url().starts_with("https://"));
    assert!(provider.environment_login_url(&environment("env-1")).starts_with("https://"));
}
