//! Configuration for EduFoyer solver sessions.
//!
//! Settings are read from `~/.edufoyer/config.toml`, then overridden by
//! environment variables, then resolved into [`Settings`] with defaults applied.
//!
//! ```toml
//! [backend]
//! base_url = "https://api.edufoyer.example"
//! token = "${EDUFOYER_TOKEN}"
//! request_timeout_secs = 30
//!
//! [solver]
//! user_id = "u-42"
//! subjects = ["java", "dbms"]
//!
//! [reconciler]
//! poll_interval_secs = 10
//! push_enabled = true
//!
//! [push]
//! idle_timeout_secs = 90
//! ```
//!
//! String values may reference environment variables as `${VAR}`; they are
//! expanded at resolve time so tokens never have to be written literally.

use serde::Deserialize;
use std::{env, fmt, path::Path, path::PathBuf, time::Duration};
use thiserror::Error;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PUSH_IDLE_TIMEOUT_SECS: u64 = 90;

pub const ENV_BASE_URL: &str = "EDUFOYER_BASE_URL";
pub const ENV_TOKEN: &str = "EDUFOYER_TOKEN";
pub const ENV_USER_ID: &str = "EDUFOYER_USER_ID";
pub const ENV_POLL_INTERVAL_SECS: &str = "EDUFOYER_POLL_INTERVAL_SECS";

const fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct EduFoyerConfig {
    pub backend: Option<BackendConfig>,
    pub solver: Option<SolverConfig>,
    pub reconciler: Option<ReconcilerConfig>,
    pub push: Option<PushConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Default, Deserialize)]
pub struct BackendConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

// Manual Debug impl to prevent leaking the bearer token in logs.
impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field(
                "token",
                &if self.token.is_some() {
                    "[REDACTED]"
                } else {
                    "None"
                },
            )
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SolverConfig {
    pub user_id: Option<String>,
    /// Subjects this solver is eligible for. Empty means "all".
    #[serde(default)]
    pub subjects: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReconcilerConfig {
    /// Seconds between backstop polls. Default: 10. Must be at least 1.
    pub poll_interval_secs: Option<u64>,
    /// Connect the push stream. Default: true. Polling always runs.
    #[serde(default = "default_true")]
    pub push_enabled: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: None,
            push_enabled: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PushConfig {
    /// Reconnect if nothing (not even a heartbeat) arrives for this long.
    pub idle_timeout_secs: Option<u64>,
}

/// Fully resolved settings with defaults and overrides applied.
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    pub base_url: String,
    pub token: String,
    pub request_timeout: Duration,
    pub user_id: String,
    pub subjects: Vec<String>,
    pub poll_interval: Duration,
    pub push_enabled: bool,
    pub push_idle_timeout: Duration,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .field("request_timeout", &self.request_timeout)
            .field("user_id", &self.user_id)
            .field("subjects", &self.subjects)
            .field("poll_interval", &self.poll_interval)
            .field("push_enabled", &self.push_enabled)
            .field("push_idle_timeout", &self.push_idle_timeout)
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("backend base_url is not configured (set [backend] base_url or EDUFOYER_BASE_URL)")]
    MissingBaseUrl,
    #[error("bearer token is not configured (set [backend] token or EDUFOYER_TOKEN)")]
    MissingToken,
    #[error("solver user_id is not configured (set [solver] user_id or EDUFOYER_USER_ID)")]
    MissingUserId,
    #[error("invalid poll interval {0:?}: expected a whole number of seconds >= 1")]
    InvalidPollInterval(String),
}

fn expand_with(value: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&lookup(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl EduFoyerConfig {
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Resolve against the process environment.
    pub fn resolve(&self) -> Result<Settings, SettingsError> {
        self.resolve_with(&|name| env::var(name).ok())
    }

    /// Resolve with an explicit environment lookup.
    ///
    /// Precedence: environment override, then config file, then default.
    pub fn resolve_with(
        &self,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Settings, SettingsError> {
        let backend = self.backend.as_ref();
        let solver = self.solver.as_ref();
        let reconciler = self.reconciler.as_ref();
        let expand = |raw: &String| expand_with(raw, lookup);

        let base_url = non_empty(lookup(ENV_BASE_URL))
            .or_else(|| non_empty(backend.and_then(|b| b.base_url.as_ref()).map(expand)))
            .ok_or(SettingsError::MissingBaseUrl)?;

        let token = non_empty(lookup(ENV_TOKEN))
            .or_else(|| non_empty(backend.and_then(|b| b.token.as_ref()).map(expand)))
            .ok_or(SettingsError::MissingToken)?;

        let user_id = non_empty(lookup(ENV_USER_ID))
            .or_else(|| non_empty(solver.and_then(|s| s.user_id.as_ref()).map(expand)))
            .ok_or(SettingsError::MissingUserId)?;

        let poll_interval_secs = match non_empty(lookup(ENV_POLL_INTERVAL_SECS)) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| SettingsError::InvalidPollInterval(raw.clone()))?,
            None => reconciler
                .and_then(|r| r.poll_interval_secs)
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        };
        if poll_interval_secs == 0 {
            return Err(SettingsError::InvalidPollInterval("0".to_string()));
        }

        let subjects = solver
            .map(|s| {
                s.subjects
                    .iter()
                    .map(|subject| subject.trim().to_string())
                    .filter(|subject| !subject.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Settings {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            token,
            request_timeout: Duration::from_secs(
                backend
                    .and_then(|b| b.request_timeout_secs)
                    .filter(|secs| *secs > 0)
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            user_id,
            subjects,
            poll_interval: Duration::from_secs(poll_interval_secs),
            push_enabled: reconciler.is_none_or(|r| r.push_enabled),
            push_idle_timeout: Duration::from_secs(
                self.push
                    .as_ref()
                    .and_then(|p| p.idle_timeout_secs)
                    .filter(|secs| *secs > 0)
                    .unwrap_or(DEFAULT_PUSH_IDLE_TIMEOUT_SECS),
            ),
        })
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".edufoyer").join("config.toml"))
}
