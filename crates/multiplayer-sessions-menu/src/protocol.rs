//! Wire protocol between a menu client and the lobby server.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use multiplayer_sessions_core::{OperationKind, SearchResult};
use serde::{Deserialize, Serialize};

use crate::menu::{ButtonState, MenuUpdate, TravelTarget};

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Host button pressed.
    Host,
    /// Join button pressed.
    Join,
    /// Leave or close the current session.
    Destroy,
    /// Start the hosted match.
    Start,
    /// Ping for keepalive.
    Ping,
}

/// How the client should travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TravelMode {
    Server,
    Client,
}

/// A found session as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub owner_name: String,
    pub match_type: Option<String>,
    pub open_public_connections: u32,
    pub ping_ms: Option<u32>,
    /// Connection token (base64 encoded).
    pub connection: String,
}

impl SessionSummary {
    /// Decode the connection token from base64.
    #[must_use]
    pub fn decode_connection(&self) -> Option<Vec<u8>> {
        BASE64.decode(&self.connection).ok()
    }
}

impl From<&SearchResult> for SessionSummary {
    fn from(result: &SearchResult) -> Self {
        Self {
            session_id: result.session_id.clone(),
            owner_name: result.owner_name.clone(),
            match_type: result.match_type().map(str::to_string),
            open_public_connections: result.open_public_connections,
            ping_ms: result.ping_ms,
            connection: BASE64.encode(result.connection.as_bytes()),
        }
    }
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current button state.
    Buttons {
        host_enabled: bool,
        join_enabled: bool,
    },
    /// Search results.
    SessionsFound { sessions: Vec<SessionSummary> },
    /// Travel the client should perform.
    Travel { mode: TravelMode, destination: String },
    /// An operation finished.
    Status {
        operation: OperationKind,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Error message.
    Error { message: String },
    /// Pong response.
    Pong,
}

impl From<ButtonState> for ServerMessage {
    fn from(buttons: ButtonState) -> Self {
        Self::Buttons {
            host_enabled: buttons.host_enabled,
            join_enabled: buttons.join_enabled,
        }
    }
}

impl From<MenuUpdate> for ServerMessage {
    fn from(update: MenuUpdate) -> Self {
        match update {
            MenuUpdate::Buttons(buttons) => buttons.into(),
            MenuUpdate::SessionsFound(results) => Self::SessionsFound {
                sessions: results.iter().map(SessionSummary::from).collect(),
            },
            MenuUpdate::Travel(target) => {
                let mode = match target {
                    TravelTarget::Server(_) => TravelMode::Server,
                    TravelTarget::Client(_) => TravelMode::Client,
                };
                Self::Travel {
                    mode,
                    destination: target.destination().to_string(),
                }
            }
            MenuUpdate::Status {
                kind,
                success,
                error,
            } => Self::Status {
                operation: kind,
                success,
                error: error.map(|e| e.to_string()),
            },
            MenuUpdate::Error(message) => Self::Error { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use multiplayer_sessions_core::{
        ConnectionToken, NetworkMode, SessionConfig, SessionError, SessionSettings,
    };

    use super::*;

    #[test]
    fn test_client_message_tags() {
        let parsed: ClientMessage = serde_json::from_str(r#"{"type":"host"}"#).unwrap();
        assert_eq!(parsed, ClientMessage::Host);

        let json = serde_json::to_string(&ClientMessage::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"resize"}"#).is_err());
    }

    #[test]
    fn test_summary_encodes_connection() {
        let result = SearchResult {
            session_id: "s1".to_string(),
            owner_name: "host".to_string(),
            settings: SessionSettings::from_config(
                &SessionConfig::new(4, "FreeForAll"),
                NetworkMode::Lan,
                1,
            ),
            open_public_connections: 3,
            ping_ms: Some(12),
            connection: ConnectionToken::from(b"127.0.0.1:7777".to_vec()),
        };

        let summary = SessionSummary::from(&result);
        assert_eq!(summary.match_type.as_deref(), Some("FreeForAll"));
        assert_eq!(summary.connection, "MTI3LjAuMC4xOjc3Nzc=");
        assert_eq!(summary.decode_connection().unwrap(), b"127.0.0.1:7777");
    }

    #[test]
    fn test_menu_updates_map_to_messages() {
        let travel: ServerMessage =
            MenuUpdate::Travel(TravelTarget::Client("10.0.0.1:7777".to_string())).into();
        assert_eq!(
            travel,
            ServerMessage::Travel {
                mode: TravelMode::Client,
                destination: "10.0.0.1:7777".to_string(),
            }
        );

        let status: ServerMessage = MenuUpdate::Status {
            kind: OperationKind::Create,
            success: false,
            error: Some(SessionError::Unavailable),
        }
        .into();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["operation"], "create");
        assert_eq!(json["success"], false);
        assert!(json["error"].is_string());

        let ok = serde_json::to_value(ServerMessage::Status {
            operation: OperationKind::Start,
            success: true,
            error: None,
        })
        .unwrap();
        assert!(ok.get("error").is_none());
    }
}
