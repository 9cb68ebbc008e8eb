use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::csp::azure::{AzureCloudProvider, AzureConfig};
use crate::csp::mock::{MockCloudProvider, MockConfig};
use crate::csp::provider::CloudProvider;
use crate::csp::resilience::ResilienceConfig;

const AZURE_CLIENT_ID: &str = "AZURE_CLIENT_ID";
const AZURE_SECRET_KEY: &str = "AZURE_SECRET_KEY";
const AZURE_TENANT_ID: &str = "AZURE_TENANT_ID";
const AZURE_USER_DOMAIN: &str = "AZURE_USER_DOMAIN";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Mock,
    Azure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockSettings {
    /// Fixed seed for reproducible runs; random when unset
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_true")]
    pub with_delay: bool,
    #[serde(default = "default_true")]
    pub with_failure: bool,
    #[serde(default = "default_delay_unit_ms")]
    pub delay_unit_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_delay_unit_ms() -> u64 {
    1000
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            seed: None,
            with_delay: true,
            with_failure: true,
            delay_unit_ms: default_delay_unit_ms(),
        }
    }
}

impl MockSettings {
    pub fn mock_config(&self) -> MockConfig {
        MockConfig {
            with_delay: self.with_delay,
            with_failure: self.with_failure,
            delay_unit: Duration::from_millis(self.delay_unit_ms),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub mock: MockSettings,
    #[serde(default)]
    pub azure: AzureConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
}

impl Config {
    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "linux") {
            dirs::config_dir()
                .context("Failed to get XDG config directory")?
                .join("csp-provisioner")
        } else {
            dirs::home_dir()
                .context("Failed to get home directory")?
                .join(".csp-provisioner")
        };

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;
            info!("Created config directory: {:?}", config_dir);
        }

        Ok(config_dir.join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        debug!("Loading config from: {:?}", config_path);

        if !config_path.exists() {
            info!("Config file doesn't exist, using defaults");
            return Ok(Self::default());
        }

        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config: Config = toml::from_str(&config_content)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        debug!("Loaded config for provider {:?}", config.provider);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        debug!("Saving config to: {:?}", config_path);

        let config_content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(config_path, config_content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        info!("Config saved successfully");
        Ok(())
    }

    /// Fill Azure credentials from `AZURE_*` environment variables
    pub fn import_azure_from_env(&mut self) -> Result<()> {
        info!("Importing Azure credentials from environment variables");
        let vars: HashMap<String, String> = std::env::vars().collect();
        self.apply_azure_vars(&vars, "environment")
    }

    /// Fill Azure credentials from a `.env` file without touching the process environment
    pub fn import_azure_from_env_file(&mut self, path: &Path) -> Result<()> {
        info!("Importing Azure credentials from .env file: {:?}", path);

        if !path.exists() {
            anyhow::bail!("Environment file not found: {:?}", path);
        }

        let vars = dotenvy::from_path_iter(path)
            .with_context(|| format!("Failed to load .env file: {:?}", path))?
            .collect::<std::result::Result<HashMap<String, String>, _>>()
            .with_context(|| format!("Failed to parse .env file: {:?}", path))?;

        self.apply_azure_vars(&vars, &format!(".env file {:?}", path))
    }

    fn apply_azure_vars(&mut self, vars: &HashMap<String, String>, source: &str) -> Result<()> {
        let required = |name: &str| {
            vars.get(name)
                .cloned()
                .with_context(|| format!("{} not found in {}", name, source))
        };

        self.azure.client_id = required(AZURE_CLIENT_ID)?;
        self.azure.secret_key = required(AZURE_SECRET_KEY)?;
        self.azure.tenant_id = required(AZURE_TENANT_ID)?;
        if let Some(domain) = vars.get(AZURE_USER_DOMAIN) {
            self.azure.user_domain = domain.clone();
        }
        self.provider = ProviderKind::Azure;
        Ok(())
    }

    /// Construct the configured backend
    pub fn build_provider(&self) -> Result<Arc<dyn CloudProvider>> {
        match self.provider {
            ProviderKind::Mock => {
                let mock_config = self.mock.mock_config();
                let provider = match self.mock.seed {
                    Some(seed) => MockCloudProvider::seeded(mock_config, seed),
                    None => MockCloudProvider::from_entropy(mock_config),
                };
                Ok(Arc::new(provider))
            }
            ProviderKind::Azure => {
                if !self.azure.is_complete() {
                    anyhow::bail!("Azure provider selected but client id, secret key or tenant id is missing");
                }
                let provider = AzureCloudProvider::new(self.azure.clone(), self.resilience.rate_limit.clone())
                    .context("Failed to create Azure provider")?;
                Ok(Arc::new(provider))
            }
        }
    }
}
