pub mod config;
pub mod provision;
pub mod revoke;

pub use config::{ConfigCommands, ConfigSubcommands};
pub use provision::ProvisionCommands;
pub use revoke::RevokeCommands;
