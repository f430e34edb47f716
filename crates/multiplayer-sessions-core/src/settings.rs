//! Session requests and the settings submitted to providers.

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Settings key carrying the match type tag.
pub const MATCH_TYPE_KEY: &str = "MatchType";

/// Default number of public connections for a hosted session.
pub const DEFAULT_MAX_PUBLIC_CONNECTIONS: u32 = 4;

/// Default match type tag.
pub const DEFAULT_MATCH_TYPE: &str = "FreeForAll";

/// Subsystem name of the LAN-only backend.
const LAN_SUBSYSTEM_NAME: &str = "NULL";

/// Unique identity of the local player issuing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(Uuid);

impl PlayerId {
    /// Generate a fresh random identity.
    #[must_use]
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Networking mode of the provider backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    /// Local-area discovery, no online service.
    Lan,
    /// Service-backed matchmaking.
    #[default]
    Online,
}

impl NetworkMode {
    /// Derive the mode from an online subsystem name.
    ///
    /// The `NULL` subsystem only supports LAN play.
    #[must_use]
    pub fn from_subsystem_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case(LAN_SUBSYSTEM_NAME) {
            Self::Lan
        } else {
            Self::Online
        }
    }

    #[must_use]
    pub const fn is_lan(self) -> bool {
        matches!(self, Self::Lan)
    }
}

/// Caller-facing description of a session to host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Number of players that can join. Must be greater than zero.
    pub max_public_connections: u32,
    /// Opaque tag used by search filtering.
    pub match_type: String,
}

impl SessionConfig {
    #[must_use]
    pub fn new(max_public_connections: u32, match_type: impl Into<String>) -> Self {
        Self {
            max_public_connections,
            match_type: match_type.into(),
        }
    }

    /// Whether the configuration satisfies the request contract.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.max_public_connections > 0
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PUBLIC_CONNECTIONS, DEFAULT_MATCH_TYPE)
    }
}

/// Full settings handed to the provider when creating a session.
///
/// Built from a [`SessionConfig`] merged with the fixed policy flags every
/// hosted session carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct SessionSettings {
    pub num_public_connections: u32,
    pub should_advertise: bool,
    pub allow_join_in_progress: bool,
    pub allow_join_via_presence: bool,
    pub uses_presence: bool,
    pub use_lobbies_if_available: bool,
    pub is_lan_match: bool,
    pub build_unique_id: u32,

    /// Advertised key/value settings, including the match type.
    #[serde(default)]
    pub settings: HashMap<String, Value>,
}

impl SessionSettings {
    /// Merge a request with the fixed policy flags.
    #[must_use]
    pub fn from_config(config: &SessionConfig, mode: NetworkMode, build_unique_id: u32) -> Self {
        let mut settings = HashMap::new();
        settings.insert(
            MATCH_TYPE_KEY.to_string(),
            Value::String(config.match_type.clone()),
        );

        Self {
            num_public_connections: config.max_public_connections,
            should_advertise: true,
            allow_join_in_progress: true,
            allow_join_via_presence: true,
            uses_presence: true,
            use_lobbies_if_available: true,
            is_lan_match: mode.is_lan(),
            build_unique_id,
            settings,
        }
    }

    /// The advertised match type tag, if any.
    #[must_use]
    pub fn match_type(&self) -> Option<&str> {
        self.settings.get(MATCH_TYPE_KEY).and_then(Value::as_str)
    }

    /// Get an advertised setting by key.
    #[must_use]
    pub fn get_setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    /// Set an advertised setting.
    pub fn set_setting(&mut self, key: impl Into<String>, value: Value) {
        self.settings.insert(key.into(), value);
    }
}

/// Parameters of a session search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    pub max_search_results: u32,
    pub is_lan_query: bool,
    /// Only match sessions advertised through presence.
    pub presence_only: bool,
}

impl SearchParams {
    /// Presence-scoped search for the given networking mode.
    #[must_use]
    pub const fn presence(max_search_results: u32, mode: NetworkMode) -> Self {
        Self {
            max_search_results,
            is_lan_query: mode.is_lan(),
            presence_only: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_carry_policy_flags_and_match_type() {
        let config = SessionConfig::new(8, "CaptureTheFlag");
        let settings = SessionSettings::from_config(&config, NetworkMode::Online, 1);

        assert_eq!(settings.num_public_connections, 8);
        assert!(settings.should_advertise);
        assert!(settings.allow_join_in_progress);
        assert!(settings.uses_presence);
        assert!(!settings.is_lan_match);
        assert_eq!(settings.match_type(), Some("CaptureTheFlag"));
    }

    #[test]
    fn test_lan_mode_from_null_subsystem() {
        assert_eq!(NetworkMode::from_subsystem_name("NULL"), NetworkMode::Lan);
        assert_eq!(NetworkMode::from_subsystem_name("Steam"), NetworkMode::Online);

        let search = SearchParams::presence(10_000, NetworkMode::Lan);
        assert!(search.is_lan_query);
        assert!(search.presence_only);
    }

    #[test]
    fn test_config_validity() {
        assert!(SessionConfig::default().is_valid());
        assert!(!SessionConfig::new(0, "FFA").is_valid());
        assert_eq!(SessionConfig::default().match_type, DEFAULT_MATCH_TYPE);
    }
}
