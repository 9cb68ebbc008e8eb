//! Failure taxonomy shared by every cloud provider operation
//!
//! Each provider call fails with exactly one [`CspError`] variant, so callers
//! decide retry, halt or reconcile by matching on the variant instead of
//! inspecting message text.

use thiserror::Error;

pub type CspResult<T> = Result<T, CspError>;

/// Environment identifier for removal errors raised without environment context
pub const UNKNOWN_ENVIRONMENT: &str = "unknown";

/// Typed failure returned by a cloud provider operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CspError {
    /// Catch-all for provider failures that fit no narrower kind
    #[error("{message}")]
    General { message: String },

    /// The entity is already being created, mutated or deleted
    #[error("An operation for this entity is already in progress: {operation_desc}")]
    OperationInProgress { operation_desc: String },

    /// Credentials are missing, malformed or rejected
    #[error("An error occurred with authentication: {auth_error}")]
    Authentication { auth_error: String },

    /// Credentials are valid but not allowed to perform the action
    #[error("An error occurred with authorization: {auth_error}")]
    Authorization { auth_error: String },

    /// Timeouts, DNS failures, unreachable endpoints
    #[error("Could not connect to cloud provider: {connection_error}")]
    Connection { connection_error: String },

    /// The provider failed on its side (5xx) for an unknown reason
    #[error("A server error occurred: {server_error}")]
    UnknownServer { server_error: String },

    #[error("The environment {env_identifier} already exists or is already being created")]
    EnvironmentExists { env_identifier: String },

    #[error("The environment {env_identifier} couldn't be created: {reason}")]
    EnvironmentCreation {
        env_identifier: String,
        reason: String,
    },

    #[error("Failed to create user {user_identifier} for environment {env_identifier}: {reason}")]
    UserProvisioning {
        env_identifier: String,
        user_identifier: String,
        reason: String,
    },

    #[error("Failed to remove user {user_identifier} for environment {env_identifier}: {reason}")]
    UserRemoval {
        env_identifier: String,
        user_identifier: String,
        reason: String,
    },

    #[error("Could not complete baseline provisioning for environment ({env_identifier}): {reason}")]
    BaselineProvision {
        env_identifier: String,
        reason: String,
    },
}

/// Coarse classification used by the orchestrator to pick a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retry with backoff
    Transient,
    /// New or better credentials are required
    Auth,
    /// Another call owns the entity; needs external reconciliation
    Conflict,
    /// The target already exists; fetch the existing state
    AlreadyExists,
    /// Halt and report to the operator
    Permanent,
}

impl CspError {
    pub fn general(message: impl Into<String>) -> Self {
        Self::General {
            message: message.into(),
        }
    }

    pub fn operation_in_progress(operation_desc: impl Into<String>) -> Self {
        Self::OperationInProgress {
            operation_desc: operation_desc.into(),
        }
    }

    pub fn authentication(auth_error: impl Into<String>) -> Self {
        Self::Authentication {
            auth_error: auth_error.into(),
        }
    }

    pub fn authorization(auth_error: impl Into<String>) -> Self {
        Self::Authorization {
            auth_error: auth_error.into(),
        }
    }

    pub fn connection(connection_error: impl Into<String>) -> Self {
        Self::Connection {
            connection_error: connection_error.into(),
        }
    }

    pub fn unknown_server(server_error: impl Into<String>) -> Self {
        Self::UnknownServer {
            server_error: server_error.into(),
        }
    }

    pub fn environment_exists(env_identifier: impl Into<String>) -> Self {
        Self::EnvironmentExists {
            env_identifier: env_identifier.into(),
        }
    }

    pub fn environment_creation(env_identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvironmentCreation {
            env_identifier: env_identifier.into(),
            reason: reason.into(),
        }
    }

    pub fn user_provisioning(
        env_identifier: impl Into<String>,
        user_identifier: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::UserProvisioning {
            env_identifier: env_identifier.into(),
            user_identifier: user_identifier.into(),
            reason: reason.into(),
        }
    }

    pub fn user_removal(
        env_identifier: impl Into<String>,
        user_identifier: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::UserRemoval {
            env_identifier: env_identifier.into(),
            user_identifier: user_identifier.into(),
            reason: reason.into(),
        }
    }

    pub fn baseline_provision(env_identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BaselineProvision {
            env_identifier: env_identifier.into(),
            reason: reason.into(),
        }
    }

    /// Human-readable text suitable for an operator-facing surface
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CspError::Connection { .. } | CspError::UnknownServer { .. } => ErrorKind::Transient,
            CspError::Authentication { .. } | CspError::Authorization { .. } => ErrorKind::Auth,
            CspError::OperationInProgress { .. } => ErrorKind::Conflict,
            CspError::EnvironmentExists { .. } => ErrorKind::AlreadyExists,
            CspError::General { .. }
            | CspError::EnvironmentCreation { .. }
            | CspError::UserProvisioning { .. }
            | CspError::UserRemoval { .. }
            | CspError::BaselineProvision { .. } => ErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_auth(&self) -> bool {
        self.kind() == ErrorKind::Auth
    }

    /// True for kinds that must halt the workflow without a retry
    pub fn is_permanent(&self) -> bool {
        matches!(self.kind(), ErrorKind::Permanent | ErrorKind::Auth | ErrorKind::Conflict)
    }

    /// Short stable label, used as a metrics and log key
    pub fn label(&self) -> &'static str {
        match self {
            CspError::General { .. } => "general",
            CspError::OperationInProgress { .. } => "operation_in_progress",
            CspError::Authentication { .. } => "authentication",
            CspError::Authorization { .. } => "authorization",
            CspError::Connection { .. } => "connection",
            CspError::UnknownServer { .. } => "unknown_server",
            CspError::EnvironmentExists { .. } => "environment_exists",
            CspError::EnvironmentCreation { .. } => "environment_creation",
            CspError::UserProvisioning { .. } => "user_provisioning",
            CspError::UserRemoval { .. } => "user_removal",
            CspError::BaselineProvision { .. } => "baseline_provision",
        }
    }
}

impl From<reqwest::Error> for CspError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() || error.is_request() {
            CspError::connection(error.to_string())
        } else if error.is_decode() || error.is_body() {
            CspError::unknown_server(format!("unreadable response: {}", error))
        } else {
            CspError::general(error.to_string())
        }
    }
}
