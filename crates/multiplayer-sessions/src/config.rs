//! Orchestrator configuration.

use std::path::{Path, PathBuf};

use multiplayer_sessions_core::{NetworkMode, PlayerId, notify::DEFAULT_HISTORY_LIMIT};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known name of the one session per process.
pub const DEFAULT_SESSION_NAME: &str = "GameSession";

const ENV_PREFIX: &str = "MULTIPLAYER_SESSIONS_";

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: String, value: String },
}

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Name the current session is tracked under.
    pub session_name: String,
    /// Networking mode. Derived from the subsystem name when unset.
    pub network_mode: Option<NetworkMode>,
    /// Build id advertised with hosted sessions.
    pub build_unique_id: u32,
    /// Local player identity. Random when unset.
    pub local_player: Option<PlayerId>,
    /// Completions kept for late subscribers.
    pub history_limit: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            session_name: DEFAULT_SESSION_NAME.to_string(),
            network_mode: None,
            build_unique_id: 1,
            local_player: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl SessionsConfig {
    /// Per-user configuration file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("multiplayer-sessions").join("config.json"))
    }

    /// Parse a JSON document. Missing fields keep their defaults.
    ///
    /// # Errors
    /// Returns error if the document is not valid configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON configuration file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Defaults, overlaid by the per-user file if present, then by the
    /// `MULTIPLAYER_SESSIONS_*` environment.
    ///
    /// # Errors
    /// Returns error if the file or an environment value is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::default_path() {
            Some(path) if path.is_file() => {
                tracing::debug!(path = %path.display(), "Loading sessions config");
                Self::from_file(&path)?
            }
            _ => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// # Errors
    /// Returns error if a variable holds an unparsable value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            let var = format!("{ENV_PREFIX}{key}");
            lookup(&var).map(|value| (var, value))
        };
        let invalid = |var: String, value: String| ConfigError::InvalidEnv { var, value };

        if let Some((_, value)) = get("SESSION_NAME") {
            self.session_name = value;
        }
        if let Some((var, value)) = get("NETWORK_MODE") {
            self.network_mode = Some(match value.to_ascii_lowercase().as_str() {
                "lan" => NetworkMode::Lan,
                "online" => NetworkMode::Online,
                _ => return Err(invalid(var, value)),
            });
        }
        if let Some((var, value)) = get("BUILD_ID") {
            self.build_unique_id = value.parse().map_err(|_| invalid(var, value.clone()))?;
        }
        if let Some((var, value)) = get("LOCAL_PLAYER") {
            let id = Uuid::parse_str(&value).map_err(|_| invalid(var, value.clone()))?;
            self.local_player = Some(PlayerId::from_uuid(id));
        }
        if let Some((var, value)) = get("HISTORY_LIMIT") {
            self.history_limit = value.parse().map_err(|_| invalid(var, value.clone()))?;
        }
        Ok(())
    }

    /// Effective networking mode for a subsystem.
    #[must_use]
    pub fn resolve_network_mode(&self, subsystem_name: Option<&str>) -> NetworkMode {
        self.network_mode.unwrap_or_else(|| {
            subsystem_name.map_or_else(NetworkMode::default, NetworkMode::from_subsystem_name)
        })
    }
}
