//! vkapi configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::api::{Credentials, Token};
use crate::scheduler::SchedulerConfig;

/// Main vkapi configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend endpoint and credential sources
    pub api: ApiConfig,

    /// Lanes, retries, throttling and batching
    pub scheduler: SchedulerConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// At least one of the two token environment variables must hold a
    /// non-blank token, or no call can succeed.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.batch.validate().map_err(|e| eyre::eyre!(e))?;

        let credentials = self.credentials();
        if credentials.is_empty() {
            return Err(eyre::eyre!(
                "No VK credentials found. Set {} and/or {}.",
                self.api.access_token_env,
                self.api.service_token_env
            ));
        }
        Ok(())
    }

    /// Read both tokens from the environment variables named in the config
    pub fn credentials(&self) -> Credentials {
        debug!(
            access_env = %self.api.access_token_env,
            service_env = %self.api.service_token_env,
            "Config::credentials: called"
        );
        Credentials::new(
            Token::from_optional(std::env::var(&self.api.access_token_env).ok()),
            Token::from_optional(std::env::var(&self.api.service_token_env).ok()),
        )
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidate_paths() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load only the log level, before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::peek(config_path).and_then(|config| config.log_level)
    }

    /// Read the first config file found without logging anything
    ///
    /// Errors are ignored here; `load` reports them once logging works.
    pub fn peek(config_path: Option<&PathBuf>) -> Option<Self> {
        let paths = match config_path {
            Some(path) => vec![path.clone()],
            None => Self::candidate_paths(),
        };
        paths
            .into_iter()
            .find(|p| p.exists())
            .and_then(|p| fs::read_to_string(p).ok())
            .and_then(|content| serde_yaml::from_str::<Self>(&content).ok())
    }

    /// Project-local `.vkapi.yml`, then `~/.config/vkapi/vkapi.yml`
    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".vkapi.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("vkapi").join("vkapi.yml"));
        }
        paths
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Backend endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// API version sent as `v` unless a call sets its own
    pub version: String,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Environment variable containing the privileged access token
    #[serde(rename = "access-token-env")]
    pub access_token_env: String,

    /// Environment variable containing the service token
    #[serde(rename = "service-token-env")]
    pub service_token_env: String,

    /// Log every request URL and raw response body
    pub debug: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.vk.com".to_string(),
            version: "5.131".to_string(),
            timeout_ms: 30_000,
            access_token_env: "VK_ACCESS_TOKEN".to_string(),
            service_token_env: "VK_SERVICE_TOKEN".to_string(),
            debug: false,
        }
    }
}
