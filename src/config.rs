use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use clap::ValueEnum;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{SessionError, SessionResult};
use crate::session::WaitOptions;
use crate::transport::Credentials;

/// Versioned API root of the public GTmetrix service.
pub const DEFAULT_BASE_URL: &str = "https://gtmetrix.com/api/0.1/";

pub const ENV_USERNAME: &str = "GTMETRIX_USERNAME";
pub const ENV_API_KEY: &str = "GTMETRIX_API_KEY";
pub const ENV_BASE_URL: &str = "GTMETRIX_BASE_URL";

/// How to treat response bodies that are not valid JSON for the expected shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DecodePolicy {
    /// Fall back to a zero-valued payload and log a warning.
    #[default]
    Permissive,
    /// Fail with [`crate::SessionError::Decode`].
    Strict,
}

/// User configuration for the GTmetrix client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "ClientSettings::default_base_url")]
    pub base_url: String,
    /// Account e-mail used for basic auth.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "ClientSettings::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "ClientSettings::default_overall_timeout_secs")]
    pub overall_timeout_secs: u64,
    /// Per-request timeout applied by the HTTP client.
    #[serde(default = "ClientSettings::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "ClientSettings::default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub decode_policy: DecodePolicy,
}

impl ClientSettings {
    fn default_base_url() -> String {
        DEFAULT_BASE_URL.into()
    }

    const fn default_poll_interval_ms() -> u64 {
        1_000
    }

    const fn default_overall_timeout_secs() -> u64 {
        300
    }

    const fn default_request_timeout_secs() -> u64 {
        30
    }

    fn default_user_agent() -> String {
        format!("gtmetrix-rs/{}", env!("CARGO_PKG_VERSION"))
    }

    /// Load settings from disk, writing defaults if missing, then apply env overrides.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Unable to read config at {}", path.display()))?;
            serde_json::from_str::<Self>(&raw)
                .with_context(|| format!("Malformed config at {}", path.display()))?
        } else {
            let settings = Self::default();
            settings.save(path)?;
            settings
        };
        settings.apply_env();
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        let serialised = serde_json::to_string_pretty(self)?;
        fs::write(path, serialised)
            .with_context(|| format!("Failed to persist config to {}", path.display()))
    }

    /// Overlay `GTMETRIX_*` environment variables onto the loaded values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(username) = non_blank(ENV_USERNAME) {
            self.username = Some(username);
        }
        if let Some(api_key) = non_blank(ENV_API_KEY) {
            self.api_key = Some(api_key);
        }
        if let Some(base_url) = non_blank(ENV_BASE_URL) {
            self.base_url = base_url;
        }
    }

    /// Resolve basic-auth credentials, failing if either half is missing.
    pub fn credentials(&self) -> SessionResult<Credentials> {
        let username = self
            .username
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                SessionError::Config(format!(
                    "GTmetrix username not configured (set {ENV_USERNAME})"
                ))
            })?;
        let api_key = self
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                SessionError::Config(format!(
                    "GTmetrix API key not configured (set {ENV_API_KEY})"
                ))
            })?;
        Ok(Credentials::new(username, api_key))
    }

    /// Reject settings the session cannot work with.
    pub fn validate(&self) -> SessionResult<()> {
        let parsed = Url::parse(&self.base_url).map_err(|err| {
            SessionError::Config(format!("invalid base_url '{}': {err}", self.base_url))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SessionError::Config(format!(
                "base_url must use http or https, got '{}'",
                parsed.scheme()
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(SessionError::Config("poll_interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            overall_timeout: Duration::from_secs(self.overall_timeout_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            username: None,
            api_key: None,
            poll_interval_ms: Self::default_poll_interval_ms(),
            overall_timeout_secs: Self::default_overall_timeout_secs(),
            request_timeout_secs: Self::default_request_timeout_secs(),
            user_agent: Self::default_user_agent(),
            decode_policy: DecodePolicy::default(),
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("com", "gtmetrix", "gtmetrix-rs")
        .context("Unable to resolve platform config directory")?;
    Ok(dirs.config_dir().join("config.json"))
}
