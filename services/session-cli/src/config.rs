//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! A missing config file is not an error; every field has a default.
//! The password is never read from the TOML, only from `--password` or the
//! SESSIONCTL_PASSWORD env var.

use common::Secret;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
}

/// API server settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout, also bounds the refresh exchange
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Credential file settings
#[derive(Debug, Default, Deserialize)]
pub struct StoreConfig {
    /// Credential file path; `~/` is expanded. Defaults to
    /// `<config dir>/sessionctl/credentials.json`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_base_url() -> String {
    session_auth::DEFAULT_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file (if present), then overlay
    /// environment variables and validate.
    pub fn load(path: &Path) -> common::Result<Self> {
        let mut config: Config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            Config::default()
        };

        if let Ok(url) = std::env::var("API_BASE_URL") {
            config.api.base_url = url;
        }
        if let Some(password) = std::env::var("SESSIONCTL_PASSWORD")
            .ok()
            .filter(|p| !p.is_empty())
        {
            config.password = Some(Secret::new(password));
        }

        if !config.api.base_url.starts_with("http://")
            && !config.api.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.api.base_url
            )));
        }

        if config.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("sessionctl.toml")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    /// Where the credential file lives.
    pub fn store_path(&self) -> common::Result<PathBuf> {
        match &self.store.path {
            Some(path) => expand_home(path),
            None => dirs::config_dir()
                .map(|dir| dir.join("sessionctl").join("credentials.json"))
                .ok_or_else(|| {
                    common::Error::Config(
                        "no platform config directory; set [store] path".into(),
                    )
                }),
        }
    }
}

fn expand_home(path: &Path) -> common::Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .ok_or_else(|| common::Error::Config("cannot expand ~: no home directory".into())),
        Err(_) => Ok(path.to_path_buf()),
    }
}
