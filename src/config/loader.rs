//! Layered configuration loader
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults (`#[serde(default)]` on every section)
//! 2. Optional TOML file: explicit path, else `RECRUIT_CONFIG_PATH`
//! 3. `RECRUIT__SECTION__FIELD` environment variables
//! 4. Variables shared with the rest of the platform: `RABBITMQ_URL`,
//!    `USER_SERVICE_URL`, `SERVICE_TOKEN`, `RECRUIT_ENV` / `NODE_ENV`

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::RecruitConfig;

pub const CONFIG_PATH_ENV: &str = "RECRUIT_CONFIG_PATH";
const ENV_PREFIX: &str = "RECRUIT";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Copy)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load using `RECRUIT_CONFIG_PATH` (if set) and the process environment
    pub fn load() -> ConfigResult<RecruitConfig> {
        let path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_from_path(path.as_deref())
    }

    /// Load from an explicit file plus the process environment
    pub fn load_from_path(path: Option<&Path>) -> ConfigResult<RecruitConfig> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Load with an injectable lookup for the platform-wide variables
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> ConfigResult<RecruitConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigurationError::FileReadError {
                    file_path: path.display().to_string(),
                    error: "file does not exist".to_string(),
                });
            }
            debug!(path = %path.display(), "Adding TOML configuration source");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let mut config: RecruitConfig = builder.build()?.try_deserialize()?;
        apply_platform_overrides(&mut config, lookup);
        config.validate()?;

        info!(
            environment = %config.environment,
            broker_provider = ?config.broker.provider,
            peer_base_url = %config.peer_service.base_url,
            circuit_breakers_enabled = config.circuit_breakers.enabled,
            "Configuration loaded"
        );

        Ok(config)
    }
}

fn apply_platform_overrides<F>(config: &mut RecruitConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("RABBITMQ_URL").filter(|v| !v.is_empty()) {
        config.broker.url = url;
    }
    if let Some(url) = lookup("USER_SERVICE_URL").filter(|v| !v.is_empty()) {
        config.peer_service.base_url = url;
    }
    if let Some(token) = lookup("SERVICE_TOKEN") {
        config.peer_service.service_token = token;
    }
    if let Some(environment) = lookup("RECRUIT_ENV").or_else(|| lookup("NODE_ENV")) {
        config.environment = environment;
    }
    if config.environment.is_empty() {
        config.environment = "development".to_string();
    }
}
