pub mod config;
pub mod plan;
pub mod provision;
pub mod revoke;

pub use config::config_command;
pub use provision::provision_command;
pub use revoke::revoke_command;

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Explicit config path if given, else the default location
pub fn config_file(config_path: Option<&Path>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path.to_path_buf()),
        None => Config::get_config_path(),
    }
}

pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    Config::load_from(&config_file(config_path)?)
}
