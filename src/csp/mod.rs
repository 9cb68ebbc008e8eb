//! Cloud service provider abstraction: the error taxonomy, the provider
//! contract, and the mock and Azure backends.

pub mod azure;
pub mod error;
pub mod mock;
pub mod models;
pub mod provider;
pub mod resilience;

pub use azure::{AzureCloudProvider, AzureConfig};
pub use error::{CspError, CspResult, ErrorKind};
pub use mock::{MockCloudProvider, MockConfig};
pub use models::{
    AdminUser, AuthCredentials, BaselineRoleMap, CspRole, Environment, EnvironmentRole, RoleStatus, User,
};
pub use provider::CloudProvider;
