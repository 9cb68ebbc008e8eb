//! Drives a [`CloudProvider`] through the environment workflow
//!
//! Order per environment: create the environment, create the admin user,
//! provision the baseline roles, then provision users. Each provider call is
//! bounded by the call timeout and retried on transient failures; anything
//! else halts the environment and is reported with the stage it happened in.

use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::report::{EnvironmentOutcome, ProvisioningError, ProvisioningRun, Stage, UserFailure, UserProvisioningReport};
use super::store::EnvironmentStore;
use crate::csp::error::{CspError, CspResult};
use crate::csp::models::{AdminUser, AuthCredentials, Environment, EnvironmentRole, RoleStatus, User};
use crate::csp::provider::CloudProvider;
use crate::csp::resilience::{MetricsCollector, MetricsSnapshot, ProvisioningLogger, ResilienceConfig, RetryPolicy};

/// Calls slower than this get a performance warning in the log
const SLOW_CALL_THRESHOLD: Duration = Duration::from_secs(30);

pub struct Provisioner {
    provider: Arc<dyn CloudProvider>,
    store: Arc<dyn EnvironmentStore>,
    retry_policy: RetryPolicy,
    call_timeout: Duration,
    logger: ProvisioningLogger,
    metrics: MetricsCollector,
    in_flight: Mutex<HashSet<String>>,
}

/// Marks an environment busy until dropped
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    environment_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(&self.environment_id);
    }
}

fn lock(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Provisioner {
    pub fn new(provider: Arc<dyn CloudProvider>, store: Arc<dyn EnvironmentStore>, config: &ResilienceConfig) -> Self {
        Self {
            provider,
            store,
            retry_policy: RetryPolicy::new(config.retry.clone()),
            call_timeout: config.call_timeout,
            logger: ProvisioningLogger::new(config.monitoring.clone()),
            metrics: MetricsCollector::new(config.monitoring.clone()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Create the environment, its admin user and its baseline roles,
    /// skipping whatever the store says is already done
    pub async fn provision_environment(
        &self,
        environment_id: &str,
        creator: &User,
    ) -> Result<EnvironmentOutcome, ProvisioningError> {
        let _guard = self.begin(environment_id, Stage::Environment)?;
        let mut environment = self.load_environment(environment_id)?;
        let root = self.provider.root_credentials();

        let already_existed = match environment.csp_id {
            Some(_) => {
                debug!("Environment {} already has a CSP id, skipping creation", environment_id);
                true
            }
            None => {
                let (csp_id, existed) = self.create_or_find_environment(&root, creator, &environment).await?;
                environment.csp_id = Some(csp_id);
                self.store.save_environment(&environment);
                existed
            }
        };
        let csp_id = environment
            .csp_id
            .clone()
            .ok_or_else(|| ProvisioningError::UnknownEnvironment {
                environment: environment_id.to_string(),
            })?;

        let admin = match (self.store.admin_user(environment_id), environment.admin_user_id.clone()) {
            (Some(admin), _) => admin,
            (None, Some(user_id)) => {
                debug!("Admin credentials for {} are not stored, using root credentials", environment_id);
                AdminUser {
                    user_id,
                    credentials: root.clone(),
                }
            }
            (None, None) => {
                let admin = self
                    .call("create_atat_admin_user", environment_id, Stage::AdminUser, || {
                        self.provider.create_atat_admin_user(&root, &csp_id)
                    })
                    .await?;
                environment.admin_user_id = Some(admin.user_id.clone());
                self.store.save_admin_user(environment_id, &admin);
                self.store.save_environment(&environment);
                admin
            }
        };

        let baseline_roles = match environment.baseline_roles.clone() {
            Some(roles) => roles,
            None => {
                let roles = self
                    .call("create_environment_baseline", environment_id, Stage::Baseline, || {
                        self.provider.create_environment_baseline(&admin.credentials, &csp_id)
                    })
                    .await?;
                environment.baseline_roles = Some(roles.clone());
                self.store.save_environment(&environment);
                roles
            }
        };

        info!("Environment {} provisioned as {}", environment_id, csp_id);
        Ok(EnvironmentOutcome {
            environment_id: environment_id.to_string(),
            login_url: self.provider.environment_login_url(&environment),
            csp_id,
            already_existed,
            admin_user_id: admin.user_id,
            baseline_roles,
        })
    }

    /// Create or update every pending or failed role in the environment
    ///
    /// Roles are handled one at a time, so the environment never has more
    /// than one mutating call in flight. One user's failure is recorded on
    /// that role and does not stop the others.
    pub async fn provision_users(&self, environment_id: &str) -> Result<UserProvisioningReport, ProvisioningError> {
        let _guard = self.begin(environment_id, Stage::User)?;
        let environment = self.load_environment(environment_id)?;

        let baseline_roles = environment.baseline_roles.clone().ok_or_else(|| {
            ProvisioningError::halted(
                environment_id,
                Stage::User,
                CspError::user_provisioning(environment_id, "*", "environment has no baseline roles"),
            )
        })?;
        let credentials = self.credentials_for(&environment);

        let (pending, settled): (Vec<_>, Vec<_>) = self
            .store
            .roles(environment_id)
            .into_iter()
            .partition(|role| matches!(role.status, RoleStatus::Pending | RoleStatus::Failed));

        let mut report = UserProvisioningReport {
            environment_id: environment_id.to_string(),
            skipped: settled.len(),
            ..Default::default()
        };

        for mut role in pending {
            let csp_role_id = baseline_roles.role_id(role.role);
            let result = self
                .call("create_or_update_user", environment_id, Stage::User, || {
                    self.provider.create_or_update_user(&credentials, &role, csp_role_id)
                })
                .await;

            match result {
                Ok(csp_user_id) => {
                    role.csp_user_id = Some(csp_user_id);
                    role.status = RoleStatus::Active;
                    self.store.save_role(&role);
                    report.provisioned.push(role);
                }
                Err(error) => {
                    warn!("User {} not provisioned in {}: {}", role.user.id, environment_id, error);
                    role.status = RoleStatus::Failed;
                    self.store.save_role(&role);
                    report.failed.push(UserFailure {
                        user_id: role.user.id.clone(),
                        role: role.role,
                        error,
                    });
                }
            }
        }

        info!(
            "Users in {}: {} provisioned, {} failed, {} skipped",
            environment_id,
            report.provisioned.len(),
            report.failed.len(),
            report.skipped
        );
        Ok(report)
    }

    /// Suspend, then delete, a user's CSP identity
    ///
    /// Resumes from the recorded status, so a revocation interrupted after
    /// the suspend only runs the delete.
    pub async fn revoke_user(&self, environment_id: &str, user_id: &str) -> Result<EnvironmentRole, ProvisioningError> {
        let _guard = self.begin(environment_id, Stage::Revocation)?;
        let environment = self.load_environment(environment_id)?;
        let mut role = self
            .store
            .role(environment_id, user_id)
            .ok_or_else(|| ProvisioningError::UnknownRole {
                environment: environment_id.to_string(),
                user: user_id.to_string(),
            })?;

        let csp_user_id = role.csp_user_id.clone().ok_or_else(|| {
            ProvisioningError::halted(
                environment_id,
                Stage::Revocation,
                CspError::user_removal(environment_id, user_id, "user was never provisioned"),
            )
        })?;
        let credentials = self.credentials_for(&environment);

        if !matches!(role.status, RoleStatus::Suspended | RoleStatus::Removed) {
            let suspended = self
                .call("suspend_user", environment_id, Stage::Revocation, || {
                    self.provider.suspend_user(&credentials, &csp_user_id)
                })
                .await?;
            Self::confirm(suspended, environment_id, &csp_user_id, "suspend")?;
            role.status = RoleStatus::Suspended;
            self.store.save_role(&role);
        }

        if role.status != RoleStatus::Removed {
            let deleted = self
                .call("delete_user", environment_id, Stage::Revocation, || {
                    self.provider.delete_user(&credentials, &csp_user_id)
                })
                .await?;
            Self::confirm(deleted, environment_id, &csp_user_id, "delete")?;
            role.status = RoleStatus::Removed;
            self.store.save_role(&role);
        }

        info!("User {} revoked from {}", user_id, environment_id);
        Ok(role)
    }

    /// Provision several environments and their users concurrently
    pub async fn provision_all(&self, environment_ids: &[String], creator: &User) -> Vec<ProvisioningRun> {
        join_all(environment_ids.iter().map(|environment_id| async move {
            let environment = self.provision_environment(environment_id, creator).await;
            let users = match &environment {
                Ok(_) => Some(self.provision_users(environment_id).await),
                Err(_) => None,
            };
            ProvisioningRun {
                environment_id: environment_id.clone(),
                environment,
                users,
            }
        }))
        .await
    }

    async fn create_or_find_environment(
        &self,
        root: &AuthCredentials,
        creator: &User,
        environment: &Environment,
    ) -> Result<(String, bool), ProvisioningError> {
        let created = self
            .call("create_environment", &environment.id, Stage::Environment, || {
                self.provider.create_environment(root, creator, environment)
            })
            .await;

        match created {
            Ok(csp_id) => Ok((csp_id, false)),
            Err(ProvisioningError::Halted {
                source: CspError::EnvironmentExists { .. },
                ..
            }) => {
                info!("Environment {} already exists, fetching existing state", environment.id);
                let stored = self
                    .store
                    .environment(&environment.id)
                    .and_then(|stored| stored.csp_id);
                let csp_id = match stored {
                    Some(csp_id) => Some(csp_id),
                    None => {
                        self.call("find_environment", &environment.id, Stage::Environment, || {
                            self.provider.find_environment(root, environment)
                        })
                        .await?
                    }
                };
                let csp_id = csp_id.ok_or_else(|| {
                    ProvisioningError::halted(
                        &environment.id,
                        Stage::Environment,
                        CspError::environment_creation(
                            &environment.id,
                            "reported as existing but could not be found",
                        ),
                    )
                })?;
                Ok((csp_id, true))
            }
            Err(error) => Err(error),
        }
    }

    /// Run one provider call with timeout, retry, logging and metrics
    async fn call<T, F, Fut>(
        &self,
        operation: &'static str,
        environment_id: &str,
        stage: Stage,
        mut make_call: F,
    ) -> Result<T, ProvisioningError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CspResult<T>>,
    {
        let context = self.logger.start_operation(operation, environment_id);
        let wait_before = self.provider.rate_limit_wait();
        let call_timeout = self.call_timeout;
        let attempt = AtomicU32::new(0);

        let retried = self
            .retry_policy
            .execute(operation, || {
                let call = make_call();
                let context = &context;
                let attempt = &attempt;
                async move {
                    let number = attempt.fetch_add(1, Ordering::Relaxed) + 1;
                    let result = match tokio::time::timeout(call_timeout, call).await {
                        Ok(result) => result,
                        Err(_) => Err(CspError::connection(format!(
                            "{} did not complete within {:?}",
                            operation, call_timeout
                        ))),
                    };
                    if let Err(error) = &result {
                        if error.is_transient() {
                            self.logger.log_retry(context, number, error);
                        }
                    }
                    result
                }
            })
            .await;

        let rate_limit_wait = self.provider.rate_limit_wait().saturating_sub(wait_before);
        let metrics = context.finish(retried.attempts, retried.outcome.as_ref().err(), rate_limit_wait);
        self.logger.complete_operation(&context, &metrics);
        self.logger.log_performance_warning(&context, SLOW_CALL_THRESHOLD);
        self.metrics.record_operation(operation, environment_id, &metrics);

        let exhausted = retried.exhausted();
        match retried.outcome {
            Ok(value) => Ok(value),
            Err(source) if exhausted => Err(ProvisioningError::RetriesExhausted {
                environment: environment_id.to_string(),
                stage,
                attempts: retried.attempts,
                source,
            }),
            Err(source) => Err(ProvisioningError::halted(environment_id, stage, source)),
        }
    }

    fn begin(&self, environment_id: &str, stage: Stage) -> Result<InFlightGuard<'_>, ProvisioningError> {
        if !lock(&self.in_flight).insert(environment_id.to_string()) {
            return Err(ProvisioningError::halted(
                environment_id,
                stage,
                CspError::operation_in_progress(format!("provisioning of environment {}", environment_id)),
            ));
        }
        Ok(InFlightGuard {
            in_flight: &self.in_flight,
            environment_id: environment_id.to_string(),
        })
    }

    fn load_environment(&self, environment_id: &str) -> Result<Environment, ProvisioningError> {
        self.store
            .environment(environment_id)
            .ok_or_else(|| ProvisioningError::UnknownEnvironment {
                environment: environment_id.to_string(),
            })
    }

    /// Admin credentials when stored, else the provider's root credentials
    fn credentials_for(&self, environment: &Environment) -> AuthCredentials {
        let credentials = self
            .store
            .admin_user(&environment.id)
            .map(|admin| admin.credentials)
            .unwrap_or_else(|| self.provider.root_credentials());
        let context = self.logger.start_operation("resolve_credentials", &environment.id);
        self.logger.log_credentials(&context, &credentials);
        credentials
    }

    fn confirm(done: bool, environment_id: &str, csp_user_id: &str, action: &str) -> Result<(), ProvisioningError> {
        if done {
            return Ok(());
        }
        Err(ProvisioningError::halted(
            environment_id,
            Stage::Revocation,
            CspError::user_removal(environment_id, csp_user_id, format!("provider did not {} the user", action)),
        ))
    }
}
