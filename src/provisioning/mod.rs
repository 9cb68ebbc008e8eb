//! Caller-side provisioning workflow on top of a [`crate::csp::CloudProvider`]

pub mod orchestrator;
pub mod report;
pub mod store;

pub use orchestrator::Provisioner;
pub use report::{EnvironmentOutcome, ProvisioningError, ProvisioningRun, Stage, UserFailure, UserProvisioningReport};
pub use store::{EnvironmentStore, InMemoryEnvironmentStore, StoreSnapshot};
