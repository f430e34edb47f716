//! WebSocket surface: every socket drives its own menu.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use multiplayer_sessions::SessionOrchestrator;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    menu::{LoggingTravel, MenuConfig, SessionsMenu},
    protocol::{ClientMessage, ServerMessage},
};

/// Builds the orchestrator for a newly connected player.
pub type OrchestratorFactory = Arc<dyn Fn() -> SessionOrchestrator + Send + Sync>;

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    factory: OrchestratorFactory,
    menu: MenuConfig,
}

impl WsState {
    #[must_use]
    pub fn new<F>(factory: F, menu: MenuConfig) -> Self
    where
        F: Fn() -> SessionOrchestrator + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            menu,
        }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();
    let (menu, mut updates) = SessionsMenu::new((state.factory)(), state.menu, LoggingTravel);
    let menu = Arc::new(menu);
    let player = menu.orchestrator().local_player();
    tracing::info!(%player, "Menu client connected");

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let update_tx = tx.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            if update_tx.send(update.into()).is_err() {
                break;
            }
        }
    });

    let menu_task = tokio::spawn({
        let menu = Arc::clone(&menu);
        async move {
            if let Err(e) = menu.run().await {
                tracing::error!("Menu loop failed: {e}");
            }
        }
    });

    let _ = tx.send(menu.buttons().into());

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s.into(),
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&msg) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                let _ = tx.send(ServerMessage::Error {
                    message: format!("Invalid message: {e}"),
                });
                continue;
            }
        };

        if let Some(reply) = dispatch(&menu, client_msg) {
            let _ = tx.send(reply);
        }
    }

    leave(&menu);
    let _ = menu_task.await;
    forward_task.abort();
    send_task.abort();
    tracing::info!(%player, "Menu client disconnected");
}

/// Stop the menu and drop whatever session the provider still holds for
/// the player, so a departed host stops being advertised.
fn leave(menu: &SessionsMenu) {
    menu.tear_down();
    if menu.orchestrator().current_session().is_some() {
        menu.orchestrator().destroy_session();
    }
}

/// Apply one client message to `menu`, returning an immediate reply if any.
fn dispatch(menu: &SessionsMenu, msg: ClientMessage) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Host => menu.host_clicked().err().map(|e| ServerMessage::Error {
            message: e.to_string(),
        }),
        ClientMessage::Join => {
            menu.join_clicked();
            None
        }
        ClientMessage::Destroy => {
            menu.orchestrator().destroy_session();
            None
        }
        ClientMessage::Start => {
            menu.orchestrator().start_session();
            None
        }
        ClientMessage::Ping => Some(ServerMessage::Pong),
    }
}

/// Create WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(WsState::new(factory, MenuConfig::default())));
/// ```
#[must_use]
pub fn create_ws_router(state: WsState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

#[cfg(test)]
mod tests {
    use multiplayer_sessions::{
        SessionsConfig,
        provider::{ManualProvider, ProviderCall},
    };
    use multiplayer_sessions_core::SessionProvider;

    use super::*;

    fn menu(provider: &Arc<ManualProvider>, config: MenuConfig) -> SessionsMenu {
        let provider: Arc<dyn SessionProvider> = provider.clone();
        let orchestrator = SessionOrchestrator::new(Some(provider), &SessionsConfig::default());
        SessionsMenu::new(orchestrator, config, LoggingTravel).0
    }

    #[test]
    fn test_dispatch_drives_orchestrator() {
        let provider = ManualProvider::new();
        let menu = menu(&provider, MenuConfig::default());

        assert_eq!(dispatch(&menu, ClientMessage::Ping), Some(ServerMessage::Pong));
        assert_eq!(dispatch(&menu, ClientMessage::Host), None);
        assert_eq!(dispatch(&menu, ClientMessage::Join), None);
        assert_eq!(dispatch(&menu, ClientMessage::Start), None);
        assert_eq!(dispatch(&menu, ClientMessage::Destroy), None);

        let submissions = provider.submissions();
        assert!(matches!(submissions[0], ProviderCall::Create { .. }));
        assert!(matches!(submissions[1], ProviderCall::Find(_)));
        assert_eq!(submissions[2], ProviderCall::Start("GameSession".to_string()));
        assert_eq!(submissions[3], ProviderCall::Destroy("GameSession".to_string()));
    }

    #[test]
    fn test_dispatch_reports_contract_errors() {
        let provider = ManualProvider::new();
        let config = MenuConfig {
            max_public_connections: 0,
            ..MenuConfig::default()
        };
        let menu = menu(&provider, config);

        let reply = dispatch(&menu, ClientMessage::Host);
        assert!(matches!(reply, Some(ServerMessage::Error { .. })));
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn test_leave_destroys_live_session() {
        // Hosted by the provider while the orchestrator's phase says otherwise.
        let provider = ManualProvider::with_session("GameSession");
        let menu = menu(&provider, MenuConfig::default());
        assert!(!menu.orchestrator().phase().has_session());

        leave(&menu);
        assert_eq!(
            provider.submissions(),
            vec![ProviderCall::Destroy("GameSession".to_string())]
        );
    }

    #[test]
    fn test_leave_without_session_is_quiet() {
        let provider = ManualProvider::new();
        let menu = menu(&provider, MenuConfig::default());

        leave(&menu);
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn test_router_builds() {
        let provider = ManualProvider::new();
        let state = WsState::new(
            move || {
                let provider: Arc<dyn SessionProvider> = provider.clone();
                SessionOrchestrator::new(Some(provider), &SessionsConfig::default())
            },
            MenuConfig::default(),
        );
        let _router: Router = create_ws_router(state);
    }
}
