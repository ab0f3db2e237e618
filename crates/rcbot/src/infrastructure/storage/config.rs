//! TOML configuration for the `rcbot` binary.
//!
//! ```toml
//! [server]
//! uri = "wss://chat.example.com/websocket"
//!
//! [credentials]
//! user = "bot"
//! password = "secret"
//!
//! [session]
//! worker_threads = 4
//! subscribe_my_messages = true
//! log_level = "info"
//! ```
//!
//! Every section and field is optional in the file.  Missing values take the
//! defaults below, and a missing file yields `AppConfig::default()`.  The
//! binary then overlays command-line and environment values, and
//! [`AppConfig::session_settings`] checks that the result is usable.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::application::session::SessionSettings;
use crate::application::worker_pool::DEFAULT_WORKER_THREADS;

/// Error type for loading and validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The server URI is not a `ws://` or `wss://` URL.
    #[error("invalid server uri {uri:?}: {reason}")]
    InvalidEndpoint { uri: String, reason: String },

    /// A required value was not given in the file, on the command line or in
    /// the environment.
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// WebSocket endpoint of the realtime API.
    #[serde(default)]
    pub uri: String,
}

#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Maximum number of inbound frames processed concurrently.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Subscribe to all of the user's room messages once logged in.
    #[serde(default = "default_true")]
    pub subscribe_my_messages: bool,
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_worker_threads() -> usize {
    DEFAULT_WORKER_THREADS
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            subscribe_my_messages: default_true(),
            log_level: default_log_level(),
        }
    }
}

// ── Loading and validation ────────────────────────────────────────────────────

/// Loads the config at `path`, returning `AppConfig::default()` if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

impl AppConfig {
    /// Checks the merged configuration and converts it into session settings.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Missing`] if the uri, user or password is empty.
    /// - [`ConfigError::InvalidEndpoint`] if the uri is not a `ws`/`wss` URL.
    pub fn session_settings(&self) -> Result<SessionSettings, ConfigError> {
        let endpoint = validate_endpoint(&self.server.uri)?;
        if self.credentials.user.is_empty() {
            return Err(ConfigError::Missing("credentials.user"));
        }
        if self.credentials.password.is_empty() {
            return Err(ConfigError::Missing("credentials.password"));
        }
        Ok(SessionSettings::new(
            endpoint,
            self.credentials.user.clone(),
            self.credentials.password.clone(),
        )
        .with_worker_threads(self.session.worker_threads))
    }
}

fn validate_endpoint(uri: &str) -> Result<String, ConfigError> {
    if uri.trim().is_empty() {
        return Err(ConfigError::Missing("server.uri"));
    }
    let url = Url::parse(uri).map_err(|e| ConfigError::InvalidEndpoint {
        uri: uri.to_owned(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url.into()),
        other => Err(ConfigError::InvalidEndpoint {
            uri: uri.to_owned(),
            reason: format!("unsupported scheme `{other}`, expected ws or wss"),
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
