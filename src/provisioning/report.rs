use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::csp::error::CspError;
use crate::csp::models::{BaselineRoleMap, CspRole, EnvironmentRole};

/// Step of the provisioning workflow a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Environment,
    AdminUser,
    Baseline,
    User,
    Revocation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Environment => "environment creation",
            Stage::AdminUser => "admin user creation",
            Stage::Baseline => "baseline provisioning",
            Stage::User => "user provisioning",
            Stage::Revocation => "user revocation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisioningError {
    /// A non-retryable provider error stopped the workflow
    #[error("Provisioning of environment {environment} halted during {stage}: {source}")]
    Halted {
        environment: String,
        stage: Stage,
        source: CspError,
    },

    /// Transient failures persisted through every allowed attempt
    #[error("Provisioning of environment {environment} gave up during {stage} after {attempts} attempts: {source}")]
    RetriesExhausted {
        environment: String,
        stage: Stage,
        attempts: u32,
        source: CspError,
    },

    #[error("Environment {environment} is not known")]
    UnknownEnvironment { environment: String },

    #[error("User {user} has no role in environment {environment}")]
    UnknownRole { environment: String, user: String },
}

impl ProvisioningError {
    pub fn halted(environment: impl Into<String>, stage: Stage, source: CspError) -> Self {
        Self::Halted {
            environment: environment.into(),
            stage,
            source,
        }
    }

    /// Provider error behind this failure, if there was one
    pub fn csp_error(&self) -> Option<&CspError> {
        match self {
            Self::Halted { source, .. } | Self::RetriesExhausted { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Halted { stage, .. } | Self::RetriesExhausted { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Operator-facing text
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Result of running the environment steps for one environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentOutcome {
    pub environment_id: String,
    pub csp_id: String,
    /// Created by an earlier run or found already present at the provider
    pub already_existed: bool,
    pub admin_user_id: String,
    pub baseline_roles: BaselineRoleMap,
    pub login_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFailure {
    pub user_id: String,
    pub role: CspRole,
    pub error: ProvisioningError,
}

/// Per-role outcome of a user provisioning pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProvisioningReport {
    pub environment_id: String,
    pub provisioned: Vec<EnvironmentRole>,
    pub failed: Vec<UserFailure>,
    /// Roles that were already active, suspended or removed
    pub skipped: usize,
}

impl UserProvisioningReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Everything that happened to one environment during a batch run
#[derive(Debug)]
pub struct ProvisioningRun {
    pub environment_id: String,
    pub environment: Result<EnvironmentOutcome, ProvisioningError>,
    /// Absent when the environment steps failed
    pub users: Option<Result<UserProvisioningReport, ProvisioningError>>,
}

impl ProvisioningRun {
    pub fn succeeded(&self) -> bool {
        self.environment.is_ok() && matches!(&self.users, Some(Ok(report)) if report.is_complete())
    }
}
