//! Fixture settings
//!
//! Manages fixture settings stored in ~/.fixturegres/config.toml, with
//! `FIXTUREGRES_*` environment variables layered on top.

use crate::config::ConnectionConfig;
use crate::db::schema::SchemaSource;
use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How to provision and seed one fixture instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureConfig {
    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_tag")]
    pub tag: String,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_credential")]
    pub username: String,

    #[serde(default = "default_credential", skip_serializing)]
    pub password: String,

    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    /// Scripts mapped into the image's init directory, run on first boot
    #[serde(default)]
    pub seed_scripts: Vec<PathBuf>,

    /// Schema executed by the runner's setup step
    #[serde(default)]
    pub schema: SchemaSource,

    /// Use an already-running database instead of starting a container
    #[serde(default)]
    pub external_url: Option<String>,
}

fn default_image() -> String {
    "postgres".to_string()
}

fn default_tag() -> String {
    "16-alpine".to_string()
}

fn default_database() -> String {
    "fixture_db".to_string()
}

fn default_credential() -> String {
    "admin".to_string()
}

fn default_startup_timeout_secs() -> u64 {
    60
}

fn default_drain_timeout_secs() -> u64 {
    5
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            tag: default_tag(),
            database: default_database(),
            username: default_credential(),
            password: default_credential(),
            startup_timeout_secs: default_startup_timeout_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
            seed_scripts: Vec::new(),
            schema: SchemaSource::default(),
            external_url: None,
        }
    }
}

impl FixtureConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Connection descriptor for the external database, if one is configured
    pub fn external_connection(&self) -> ConfigResult<Option<ConnectionConfig>> {
        self.external_url
            .as_deref()
            .map(ConnectionConfig::from_url)
            .transpose()
    }

    /// Layer `FIXTUREGRES_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        if let Some(image) = lookup("FIXTUREGRES_IMAGE") {
            self.image = image;
        }
        if let Some(tag) = lookup("FIXTUREGRES_TAG") {
            self.tag = tag;
        }
        if let Some(url) = lookup("FIXTUREGRES_DATABASE_URL") {
            ConnectionConfig::from_url(&url)?;
            self.external_url = Some(url);
        }
        if let Some(secs) = lookup("FIXTUREGRES_STARTUP_TIMEOUT_SECS") {
            self.startup_timeout_secs = secs.parse().map_err(|_| {
                ConfigError::Invalid(format!("FIXTUREGRES_STARTUP_TIMEOUT_SECS: {}", secs))
            })?;
        }
        Ok(())
    }
}

/// Get the config directory path (~/.fixturegres/)
pub fn config_dir() -> ConfigResult<PathBuf> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(".fixturegres"))
}

/// Load settings from the default config file, falling back to defaults
pub fn load_fixture_config() -> ConfigResult<FixtureConfig> {
    let path = config_dir()?.join("config.toml");
    if !path.exists() {
        return Ok(FixtureConfig::default());
    }
    load_fixture_config_from(&path)
}

/// Load settings from an explicit path
pub fn load_fixture_config_from(path: &Path) -> ConfigResult<FixtureConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::NotFound(format!("{}: {}", path.display(), e)))?;
    let config: FixtureConfig = toml::from_str(&content)?;
    Ok(config)
}
