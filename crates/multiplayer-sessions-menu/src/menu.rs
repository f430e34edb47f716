//! Host/join menu reacting to orchestrator completions.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use multiplayer_sessions::SessionOrchestrator;
use multiplayer_sessions_core::{
    ContractError, DEFAULT_MATCH_TYPE, DEFAULT_MAX_PUBLIC_CONNECTIONS, FindOutcome, JoinOutcome,
    OperationKind, Outcome, SearchResult, SessionConfig, SessionError, SessionEvent,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc, watch,
};

pub const DEFAULT_LOBBY_PATH: &str = "/Game/ThirdPerson/Maps/Lobby";
pub const DEFAULT_MAX_SEARCH_RESULTS: u32 = 10_000;

/// Presentation settings for the menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MenuConfig {
    pub max_public_connections: u32,
    /// Match type hosted sessions advertise and joins look for.
    pub match_type: String,
    /// Map the host travels to once its session exists.
    pub lobby_path: String,
    pub max_search_results: u32,
}

impl Default for MenuConfig {
    fn default() -> Self {
        Self {
            max_public_connections: DEFAULT_MAX_PUBLIC_CONNECTIONS,
            match_type: DEFAULT_MATCH_TYPE.to_string(),
            lobby_path: DEFAULT_LOBBY_PATH.to_string(),
            max_search_results: DEFAULT_MAX_SEARCH_RESULTS,
        }
    }
}

impl MenuConfig {
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.max_public_connections, self.match_type.clone())
    }

    /// Lobby URL opened as a listen server.
    #[must_use]
    pub fn listen_url(&self) -> String {
        format!("{}?listen", self.lobby_path)
    }
}

/// Menu error.
#[derive(Debug, Error)]
pub enum MenuError {
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("Travel failed: {0}")]
    Travel(String),
    #[error("Joined session has no connect address")]
    NoConnectAddress,
    #[error("Menu event loop already running")]
    AlreadyRunning,
}

/// Where the player is sent after hosting or joining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TravelTarget {
    /// Open a map as a listen server.
    Server(String),
    /// Connect to a remote host.
    Client(String),
}

impl TravelTarget {
    #[must_use]
    pub fn destination(&self) -> &str {
        match self {
            Self::Server(url) | Self::Client(url) => url,
        }
    }
}

/// Moves the local player between maps and servers.
///
/// Implement this to hook the menu into your game or UI shell.
#[async_trait]
pub trait Travel: Send + Sync {
    /// Open `url` locally as a listen server.
    async fn server_travel(&self, url: &str) -> Result<(), MenuError>;

    /// Connect to the host at `address`.
    async fn client_travel(&self, address: &str) -> Result<(), MenuError>;
}

/// Travel that only logs. Clients learn the destination from [`MenuUpdate::Travel`].
#[derive(Debug, Default, Clone)]
pub struct LoggingTravel;

#[async_trait]
impl Travel for LoggingTravel {
    async fn server_travel(&self, url: &str) -> Result<(), MenuError> {
        tracing::info!(%url, "Server travel");
        Ok(())
    }

    async fn client_travel(&self, address: &str) -> Result<(), MenuError> {
        tracing::info!(%address, "Client travel");
        Ok(())
    }
}

/// Which menu buttons accept clicks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonState {
    pub host_enabled: bool,
    pub join_enabled: bool,
}

impl Default for ButtonState {
    fn default() -> Self {
        Self {
            host_enabled: true,
            join_enabled: true,
        }
    }
}

/// Change the UI should reflect.
#[derive(Debug, Clone, PartialEq)]
pub enum MenuUpdate {
    Buttons(ButtonState),
    SessionsFound(Vec<SearchResult>),
    Travel(TravelTarget),
    Status {
        kind: OperationKind,
        success: bool,
        error: Option<SessionError>,
    },
    Error(String),
}

/// First joinable result advertising `match_type`.
#[must_use]
pub fn select_session<'a>(results: &'a [SearchResult], match_type: &str) -> Option<&'a SearchResult> {
    results
        .iter()
        .find(|result| result.is_joinable() && result.match_type() == Some(match_type))
}

/// A rejected duplicate: the original operation is still in flight.
const fn is_busy(error: Option<&SessionError>) -> bool {
    matches!(error, Some(SessionError::Busy(_)))
}

/// Host/join menu bound to one orchestrator.
///
/// Clicks start operations; [`Self::run`] reacts to their completions.
pub struct SessionsMenu {
    orchestrator: SessionOrchestrator,
    config: MenuConfig,
    travel: Box<dyn Travel>,
    buttons: Mutex<ButtonState>,
    events: Mutex<Option<broadcast::Receiver<SessionEvent>>>,
    updates: mpsc::UnboundedSender<MenuUpdate>,
    shutdown: watch::Sender<bool>,
}

impl SessionsMenu {
    /// Create a menu and the receiver for its UI updates.
    ///
    /// Subscribes to the orchestrator immediately, so completions of
    /// operations clicked before [`Self::run`] starts are not missed.
    #[must_use]
    pub fn new(
        orchestrator: SessionOrchestrator,
        config: MenuConfig,
        travel: impl Travel + 'static,
    ) -> (Self, mpsc::UnboundedReceiver<MenuUpdate>) {
        let events = orchestrator.notifications().subscribe_events();
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let menu = Self {
            orchestrator,
            config,
            travel: Box::new(travel),
            buttons: Mutex::new(ButtonState::default()),
            events: Mutex::new(Some(events)),
            updates,
            shutdown,
        };
        (menu, updates_rx)
    }

    #[must_use]
    pub const fn orchestrator(&self) -> &SessionOrchestrator {
        &self.orchestrator
    }

    #[must_use]
    pub const fn config(&self) -> &MenuConfig {
        &self.config
    }

    #[must_use]
    pub fn buttons(&self) -> ButtonState {
        *self.lock_buttons()
    }

    /// Host a session with the menu's settings.
    ///
    /// # Errors
    /// Returns error if the menu config requests zero connections.
    pub fn host_clicked(&self) -> Result<(), MenuError> {
        self.update_buttons(|b| b.host_enabled = false);
        if let Err(e) = self.orchestrator.create_session(self.config.session_config()) {
            self.update_buttons(|b| b.host_enabled = true);
            return Err(e.into());
        }
        Ok(())
    }

    /// Search for a session to join.
    pub fn join_clicked(&self) {
        self.update_buttons(|b| b.join_enabled = false);
        self.orchestrator.find_sessions(self.config.max_search_results);
    }

    /// Stop [`Self::run`].
    pub fn tear_down(&self) {
        self.shutdown.send_replace(true);
    }

    /// React to completions until [`Self::tear_down`] or the orchestrator goes away.
    ///
    /// # Errors
    /// Returns error if the loop was already started.
    pub async fn run(&self) -> Result<(), MenuError> {
        let mut events = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(MenuError::AlreadyRunning)?;
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                () = async { drop(shutdown.wait_for(|stopped| *stopped).await); } => break,
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Err(e) = self.handle_event(event).await {
                            tracing::warn!("Menu reaction failed: {e}");
                            self.send(MenuUpdate::Error(e.to_string()));
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Menu fell behind session events");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        tracing::debug!("Menu event loop stopped");
        Ok(())
    }

    /// Apply one completion to the menu.
    ///
    /// # Errors
    /// Returns error if travel fails or a joined session has no address.
    pub async fn handle_event(&self, event: SessionEvent) -> Result<(), MenuError> {
        match event {
            SessionEvent::CreateComplete(outcome) => self.on_create(outcome).await,
            SessionEvent::FindComplete(outcome) => self.on_find(outcome),
            SessionEvent::JoinComplete(outcome) => self.on_join(outcome).await,
            SessionEvent::DestroyComplete(outcome) => {
                self.status(OperationKind::Destroy, outcome);
                Ok(())
            }
            SessionEvent::StartComplete(outcome) => {
                self.status(OperationKind::Start, outcome);
                Ok(())
            }
        }
    }

    async fn on_create(&self, outcome: Outcome) -> Result<(), MenuError> {
        let success = outcome.success;
        let busy = is_busy(outcome.error.as_ref());
        self.status(OperationKind::Create, outcome);
        if busy {
            return Ok(());
        }
        if !success {
            self.update_buttons(|b| b.host_enabled = true);
            return Ok(());
        }

        let target = TravelTarget::Server(self.config.listen_url());
        if let Err(e) = self.travel_to(target).await {
            self.update_buttons(|b| b.host_enabled = true);
            return Err(e);
        }
        Ok(())
    }

    fn on_find(&self, outcome: FindOutcome) -> Result<(), MenuError> {
        if is_busy(outcome.error.as_ref()) {
            tracing::debug!("Search already in flight");
            return Ok(());
        }
        if outcome.success {
            self.send(MenuUpdate::SessionsFound(outcome.results.clone()));
        }

        let chosen = outcome
            .success
            .then(|| select_session(&outcome.results, &self.config.match_type))
            .flatten();
        let Some(target) = chosen else {
            tracing::info!(
                match_type = %self.config.match_type,
                found = outcome.results.len(),
                "No session to join"
            );
            self.update_buttons(|b| b.join_enabled = true);
            return Ok(());
        };

        tracing::info!(session_id = %target.session_id, owner = %target.owner_name, "Joining match");
        if let Err(e) = self.orchestrator.join_session(target) {
            self.update_buttons(|b| b.join_enabled = true);
            return Err(e.into());
        }
        Ok(())
    }

    async fn on_join(&self, outcome: JoinOutcome) -> Result<(), MenuError> {
        let busy = is_busy(outcome.error.as_ref());
        self.send(MenuUpdate::Status {
            kind: OperationKind::Join,
            success: outcome.result.is_success(),
            error: outcome.error,
        });
        if busy {
            return Ok(());
        }
        if !outcome.result.is_success() {
            self.update_buttons(|b| b.join_enabled = true);
            return Ok(());
        }

        let travelled = match self.orchestrator.connect_address() {
            Some(address) => self.travel_to(TravelTarget::Client(address)).await,
            None => Err(MenuError::NoConnectAddress),
        };
        if travelled.is_err() {
            self.update_buttons(|b| b.join_enabled = true);
        }
        travelled
    }

    async fn travel_to(&self, target: TravelTarget) -> Result<(), MenuError> {
        match &target {
            TravelTarget::Server(url) => self.travel.server_travel(url).await?,
            TravelTarget::Client(address) => self.travel.client_travel(address).await?,
        }
        self.send(MenuUpdate::Travel(target));
        Ok(())
    }

    fn status(&self, kind: OperationKind, outcome: Outcome) {
        self.send(MenuUpdate::Status {
            kind,
            success: outcome.success,
            error: outcome.error,
        });
    }

    fn lock_buttons(&self) -> MutexGuard<'_, ButtonState> {
        self.buttons.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_buttons(&self, change: impl FnOnce(&mut ButtonState)) {
        let buttons = {
            let mut buttons = self.lock_buttons();
            change(&mut buttons);
            *buttons
        };
        self.send(MenuUpdate::Buttons(buttons));
    }

    fn send(&self, update: MenuUpdate) {
        // The UI may have gone away; the menu keeps working without it.
        let _ = self.updates.send(update);
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use multiplayer_sessions::{
        SessionsConfig,
        provider::{ManualProvider, ProviderCall},
    };
    use multiplayer_sessions_core::{
        ConnectionToken, JoinResult, NetworkMode, ProviderCompletion, SessionProvider,
        SessionSettings,
    };
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    const NAME: &str = "GameSession";

    #[derive(Default)]
    struct RecordingTravel {
        targets: Arc<Mutex<Vec<TravelTarget>>>,
        fail: bool,
    }

    #[async_trait]
    impl Travel for RecordingTravel {
        async fn server_travel(&self, url: &str) -> Result<(), MenuError> {
            if self.fail {
                return Err(MenuError::Travel("map not found".to_string()));
            }
            self.targets
                .lock()
                .unwrap()
                .push(TravelTarget::Server(url.to_string()));
            Ok(())
        }

        async fn client_travel(&self, address: &str) -> Result<(), MenuError> {
            self.targets
                .lock()
                .unwrap()
                .push(TravelTarget::Client(address.to_string()));
            Ok(())
        }
    }

    fn result(session_id: &str, match_type: &str) -> SearchResult {
        SearchResult {
            session_id: session_id.to_string(),
            owner_name: format!("owner-{session_id}"),
            settings: SessionSettings::from_config(
                &SessionConfig::new(4, match_type),
                NetworkMode::Online,
                1,
            ),
            open_public_connections: 4,
            ping_ms: None,
            connection: ConnectionToken::from(session_id.to_string()),
        }
    }

    fn menu_over(
        provider: &Arc<ManualProvider>,
        config: MenuConfig,
    ) -> (
        SessionsMenu,
        mpsc::UnboundedReceiver<MenuUpdate>,
        Arc<Mutex<Vec<TravelTarget>>>,
    ) {
        let provider: Arc<dyn SessionProvider> = provider.clone();
        let orchestrator = SessionOrchestrator::new(Some(provider), &SessionsConfig::default());
        let travel = RecordingTravel::default();
        let targets = Arc::clone(&travel.targets);
        let (menu, updates) = SessionsMenu::new(orchestrator, config, travel);
        (menu, updates, targets)
    }

    fn drain(updates: &mut mpsc::UnboundedReceiver<MenuUpdate>) -> Vec<MenuUpdate> {
        let mut drained = Vec::new();
        while let Ok(update) = updates.try_recv() {
            drained.push(update);
        }
        drained
    }

    #[test]
    fn test_select_session_matches_type() {
        let results = vec![result("a", "A"), result("b", "B")];
        let chosen = select_session(&results, "B").unwrap();
        assert_eq!(chosen.session_id, "b");
        assert!(select_session(&results, "C").is_none());
        assert!(select_session(&[], "B").is_none());
    }

    #[test]
    fn test_select_session_skips_unjoinable() {
        let mut unreachable = result("a", "B");
        unreachable.connection = ConnectionToken::default();
        let results = vec![unreachable, result("b", "B")];
        assert_eq!(select_session(&results, "B").unwrap().session_id, "b");
    }

    #[test]
    fn test_menu_config_defaults() {
        let config = MenuConfig::default();
        assert_eq!(config.session_config(), SessionConfig::new(4, "FreeForAll"));
        assert_eq!(config.listen_url(), "/Game/ThirdPerson/Maps/Lobby?listen");
        assert_eq!(config.max_search_results, 10_000);

        let parsed: MenuConfig = serde_json::from_str(r#"{"match_type":"Duel"}"#).unwrap();
        assert_eq!(parsed.match_type, "Duel");
        assert_eq!(parsed.max_public_connections, 4);
    }

    #[tokio::test]
    async fn test_host_travels_to_lobby() {
        let provider = ManualProvider::new();
        let (menu, mut updates, targets) = menu_over(&provider, MenuConfig::default());

        assert_ok!(menu.host_clicked());
        assert!(!menu.buttons().host_enabled);
        let submissions = provider.submissions();
        let ProviderCall::Create { settings, .. } = &submissions[0] else {
            panic!("expected a create submission");
        };
        assert_eq!(settings.match_type(), Some("FreeForAll"));
        assert_eq!(settings.num_public_connections, 4);

        assert_ok!(
            menu.handle_event(SessionEvent::CreateComplete(Outcome::succeeded()))
                .await
        );
        assert_eq!(
            *targets.lock().unwrap(),
            vec![TravelTarget::Server("/Game/ThirdPerson/Maps/Lobby?listen".to_string())]
        );
        assert!(drain(&mut updates).contains(&MenuUpdate::Travel(TravelTarget::Server(
            "/Game/ThirdPerson/Maps/Lobby?listen".to_string()
        ))));
    }

    #[tokio::test]
    async fn test_failed_host_reenables_button() {
        let provider = ManualProvider::new();
        let (menu, _updates, targets) = menu_over(&provider, MenuConfig::default());

        assert_ok!(menu.host_clicked());
        assert_ok!(
            menu.handle_event(SessionEvent::CreateComplete(Outcome::failed(
                SessionError::Unavailable
            )))
            .await
        );
        assert!(menu.buttons().host_enabled);
        assert!(targets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_double_click_keeps_buttons_disabled() {
        let provider = ManualProvider::new();
        let (menu, _updates, _) = menu_over(&provider, MenuConfig::default());
        let mut events = menu.orchestrator().notifications().subscribe_events();

        assert_ok!(menu.host_clicked());
        assert_ok!(menu.host_clicked());
        menu.join_clicked();
        menu.join_clicked();

        let busy_create = events.try_recv().unwrap();
        assert_eq!(
            busy_create,
            SessionEvent::CreateComplete(Outcome::failed(SessionError::Busy(
                OperationKind::Create
            )))
        );
        assert_ok!(menu.handle_event(busy_create).await);
        let busy_find = events.try_recv().unwrap();
        assert_eq!(
            busy_find,
            SessionEvent::FindComplete(FindOutcome::failed(SessionError::Busy(
                OperationKind::Find
            )))
        );
        assert_ok!(menu.handle_event(busy_find).await);
        assert_ok!(
            menu.handle_event(SessionEvent::JoinComplete(JoinOutcome::failed(
                SessionError::Busy(OperationKind::Join)
            )))
            .await
        );

        assert_eq!(
            menu.buttons(),
            ButtonState {
                host_enabled: false,
                join_enabled: false,
            }
        );

        // The original create still re-enables on a real failure.
        provider.complete(ProviderCompletion::Create {
            session_name: NAME.to_string(),
            success: false,
        });
        let failed = events.try_recv().unwrap();
        assert_ok!(menu.handle_event(failed).await);
        assert!(menu.buttons().host_enabled);
    }

    #[tokio::test]
    async fn test_failed_travel_reenables_host() {
        let provider: Arc<dyn SessionProvider> = ManualProvider::new();
        let orchestrator = SessionOrchestrator::new(Some(provider), &SessionsConfig::default());
        let travel = RecordingTravel {
            fail: true,
            ..RecordingTravel::default()
        };
        let (menu, _updates) = SessionsMenu::new(orchestrator, MenuConfig::default(), travel);

        assert_ok!(menu.host_clicked());
        let err = assert_err!(
            menu.handle_event(SessionEvent::CreateComplete(Outcome::succeeded()))
                .await
        );
        assert!(matches!(err, MenuError::Travel(_)));
        assert!(menu.buttons().host_enabled);
    }

    #[test]
    fn test_invalid_host_config_is_reported() {
        let provider = ManualProvider::new();
        let config = MenuConfig {
            max_public_connections: 0,
            ..MenuConfig::default()
        };
        let (menu, _updates, _) = menu_over(&provider, config);

        assert!(matches!(
            menu.host_clicked(),
            Err(MenuError::Contract(ContractError::InvalidConfig))
        ));
        assert!(menu.buttons().host_enabled);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_join_picks_matching_session_and_travels() {
        let provider = ManualProvider::new();
        provider.set_connect_string(Some("192.168.1.20:7777".to_string()));
        let config = MenuConfig {
            match_type: "B".to_string(),
            ..MenuConfig::default()
        };
        let (menu, _updates, targets) = menu_over(&provider, config);

        menu.join_clicked();
        assert!(!menu.buttons().join_enabled);
        assert!(matches!(
            &provider.submissions()[0],
            ProviderCall::Find(search) if search.max_search_results == 10_000
        ));

        let found = FindOutcome {
            results: vec![result("a", "A"), result("b", "B")],
            success: true,
            error: None,
        };
        assert_ok!(menu.handle_event(SessionEvent::FindComplete(found)).await);
        assert_eq!(
            provider.submissions()[1],
            ProviderCall::Join {
                session_name: NAME.to_string(),
                session_id: "b".to_string(),
            }
        );

        assert_ok!(
            menu.handle_event(SessionEvent::JoinComplete(JoinOutcome {
                result: JoinResult::Success,
                error: None,
            }))
            .await
        );
        assert_eq!(
            *targets.lock().unwrap(),
            vec![TravelTarget::Client("192.168.1.20:7777".to_string())]
        );
        assert!(!menu.buttons().join_enabled);
    }

    #[tokio::test]
    async fn test_no_match_reenables_join() {
        let provider = ManualProvider::new();
        let (menu, mut updates, _) = menu_over(&provider, MenuConfig::default());

        menu.join_clicked();
        let found = FindOutcome {
            results: vec![result("a", "Duel")],
            success: true,
            error: None,
        };
        assert_ok!(menu.handle_event(SessionEvent::FindComplete(found)).await);

        assert!(menu.buttons().join_enabled);
        assert_eq!(provider.submissions().len(), 1);
        let updates = drain(&mut updates);
        assert!(matches!(&updates[1], MenuUpdate::SessionsFound(found) if found.len() == 1));
        assert_eq!(updates.last(), Some(&MenuUpdate::Buttons(ButtonState::default())));
    }

    #[tokio::test]
    async fn test_failed_search_reenables_join() {
        let provider = ManualProvider::new();
        let (menu, _updates, _) = menu_over(&provider, MenuConfig::default());

        menu.join_clicked();
        assert_ok!(
            menu.handle_event(SessionEvent::FindComplete(FindOutcome::failed(
                SessionError::EmptyResult
            )))
            .await
        );
        assert!(menu.buttons().join_enabled);
    }

    #[tokio::test]
    async fn test_join_without_address_fails() {
        let provider = ManualProvider::new();
        let (menu, _updates, targets) = menu_over(&provider, MenuConfig::default());

        menu.join_clicked();
        let err = assert_err!(
            menu.handle_event(SessionEvent::JoinComplete(JoinOutcome {
                result: JoinResult::Success,
                error: None,
            }))
            .await
        );
        assert!(matches!(err, MenuError::NoConnectAddress));
        assert!(menu.buttons().join_enabled);
        assert!(targets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_reacts_until_torn_down() {
        let provider = ManualProvider::new();
        let (menu, mut updates, targets) = menu_over(&provider, MenuConfig::default());
        let menu = Arc::new(menu);

        assert_ok!(menu.host_clicked());
        provider.complete(ProviderCompletion::Create {
            session_name: NAME.to_string(),
            success: true,
        });

        let runner = tokio::spawn({
            let menu = Arc::clone(&menu);
            async move { menu.run().await }
        });

        let travelled = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(update) = updates.recv().await {
                if let MenuUpdate::Travel(target) = update {
                    return target;
                }
            }
            panic!("update channel closed");
        })
        .await
        .unwrap();
        assert_eq!(travelled.destination(), "/Game/ThirdPerson/Maps/Lobby?listen");
        assert_eq!(targets.lock().unwrap().len(), 1);

        assert!(matches!(menu.run().await, Err(MenuError::AlreadyRunning)));

        menu.tear_down();
        let stopped = tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap();
        assert_ok!(stopped);
    }
}
