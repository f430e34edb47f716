//! In-process LAN session backend.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU16, AtomicU64, Ordering},
    },
    time::Duration,
};

use multiplayer_sessions_core::{
    ConnectionToken, DelegateHandle, JoinResult, OnlineSubsystem, OperationKind, PlayerId,
    ProviderCallback, ProviderCompletion, SearchParams, SearchResult, SessionDescriptor,
    SessionProvider, SessionSettings, SessionState, SubmitError,
};
use tokio::runtime::Handle;
use uuid::Uuid;

/// Subsystem name reported by [`LocalSubsystem`].
pub const LOCAL_SUBSYSTEM_NAME: &str = "NULL";

/// First listen port handed out to hosts.
const BASE_PORT: u16 = 7777;

struct HostedSession {
    owner: PlayerId,
    owner_name: String,
    settings: SessionSettings,
    state: SessionState,
    port: u16,
    members: HashSet<PlayerId>,
}

impl HostedSession {
    fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    fn open_connections(&self) -> u32 {
        let taken = u32::try_from(self.members.len()).unwrap_or(u32::MAX);
        self.settings.num_public_connections.saturating_sub(taken)
    }

    fn accepts_joins(&self) -> bool {
        match self.state {
            SessionState::Pending => true,
            SessionState::InProgress => self.settings.allow_join_in_progress,
            SessionState::Starting | SessionState::Destroying => false,
        }
    }

    fn to_search_result(&self, session_id: &str) -> SearchResult {
        SearchResult {
            session_id: session_id.to_string(),
            owner_name: self.owner_name.clone(),
            settings: self.settings.clone(),
            open_public_connections: self.open_connections(),
            ping_ms: Some(0),
            connection: ConnectionToken::from(session_id.to_string()),
        }
    }
}

/// Segment every local provider discovers sessions on.
///
/// Stands in for the LAN broadcast domain: providers attached to the same
/// network see each other's advertised sessions.
pub struct LocalNetwork {
    sessions: RwLock<HashMap<String, HostedSession>>,
    next_port: AtomicU16,
}

impl Default for LocalNetwork {
    fn default() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_port: AtomicU16::new(BASE_PORT),
        }
    }
}

impl LocalNetwork {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of hosted sessions on the segment.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn allocate_port(&self) -> u16 {
        self.next_port.fetch_add(1, Ordering::Relaxed)
    }
}

/// How this process takes part in a named session.
enum Membership {
    Host { session_id: String },
    Guest { session_id: String, player: PlayerId },
}

impl Membership {
    fn session_id(&self) -> &str {
        match self {
            Self::Host { session_id } | Self::Guest { session_id, .. } => session_id,
        }
    }
}

type CallbackRegistry = Arc<RwLock<HashMap<u64, (OperationKind, ProviderCallback)>>>;

/// Session provider backed by a [`LocalNetwork`].
///
/// Every accepted request completes on a spawned tokio task, so submissions
/// need a runtime and callbacks arrive on runtime threads.
pub struct LocalSessionProvider {
    network: Arc<LocalNetwork>,
    owner_name: String,
    callbacks: CallbackRegistry,
    next_handle: AtomicU64,
    memberships: RwLock<HashMap<String, Membership>>,
    latency: Duration,
}

impl LocalSessionProvider {
    /// Create a provider for one process on `network`.
    #[must_use]
    pub fn new(network: Arc<LocalNetwork>, owner_name: impl Into<String>) -> Self {
        Self {
            network,
            owner_name: owner_name.into(),
            callbacks: Arc::new(RwLock::new(HashMap::new())),
            next_handle: AtomicU64::new(1),
            memberships: RwLock::new(HashMap::new()),
            latency: Duration::ZERO,
        }
    }

    /// Delay every completion by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn deliver(&self, runtime: &Handle, completion: ProviderCompletion) {
        let callbacks = Arc::clone(&self.callbacks);
        let latency = self.latency;

        runtime.spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let kind = completion.kind();
            let targets: Vec<ProviderCallback> = callbacks
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .filter(|(k, _)| *k == kind)
                .map(|(_, cb)| Arc::clone(cb))
                .collect();

            tracing::trace!(%kind, callbacks = targets.len(), "Delivering completion");
            for callback in targets {
                callback(completion.clone());
            }
        });
    }
}

fn current_runtime() -> Result<Handle, SubmitError> {
    Handle::try_current().map_err(|e| SubmitError::Rejected(format!("no async runtime: {e}")))
}

impl SessionProvider for LocalSessionProvider {
    fn register(&self, kind: OperationKind, callback: ProviderCallback) -> DelegateHandle {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, (kind, callback));
        DelegateHandle::new(id)
    }

    fn unregister(&self, handle: DelegateHandle) -> bool {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.id())
            .is_some()
    }

    fn create_session(
        &self,
        requester: &PlayerId,
        session_name: &str,
        settings: &SessionSettings,
    ) -> Result<(), SubmitError> {
        let runtime = current_runtime()?;
        let mut memberships = self
            .memberships
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if memberships.contains_key(session_name) {
            return Err(SubmitError::AlreadyExists(session_name.to_string()));
        }

        let session_id = Uuid::new_v4().to_string();
        let hosted = HostedSession {
            owner: *requester,
            owner_name: self.owner_name.clone(),
            settings: settings.clone(),
            state: SessionState::Pending,
            port: self.network.allocate_port(),
            members: HashSet::new(),
        };
        tracing::debug!(%session_id, address = %hosted.address(), "Hosting local session");

        self.network
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.clone(), hosted);
        memberships.insert(session_name.to_string(), Membership::Host { session_id });
        drop(memberships);

        self.deliver(
            &runtime,
            ProviderCompletion::Create {
                session_name: session_name.to_string(),
                success: true,
            },
        );
        Ok(())
    }

    fn find_sessions(&self, requester: &PlayerId, search: &SearchParams) -> Result<(), SubmitError> {
        let runtime = current_runtime()?;
        let limit = usize::try_from(search.max_search_results).unwrap_or(usize::MAX);

        let results = {
            let sessions = self
                .network
                .sessions
                .read()
                .unwrap_or_else(PoisonError::into_inner);

            let mut found: Vec<(&String, &HostedSession)> = sessions
                .iter()
                .filter(|(_, s)| s.owner != *requester)
                .filter(|(_, s)| s.settings.should_advertise)
                .filter(|(_, s)| !search.presence_only || s.settings.uses_presence)
                .filter(|(_, s)| s.settings.is_lan_match == search.is_lan_query)
                .filter(|(_, s)| s.accepts_joins())
                .collect();
            found.sort_by_key(|(_, s)| s.port);

            found
                .into_iter()
                .take(limit)
                .map(|(id, s)| s.to_search_result(id))
                .collect::<Vec<_>>()
        };

        self.deliver(
            &runtime,
            ProviderCompletion::Find {
                success: true,
                results,
            },
        );
        Ok(())
    }

    fn join_session(
        &self,
        requester: &PlayerId,
        session_name: &str,
        target: &SearchResult,
    ) -> Result<(), SubmitError> {
        let runtime = current_runtime()?;
        let session_id = std::str::from_utf8(target.connection.as_bytes())
            .map_err(|_| SubmitError::Rejected("malformed connection token".to_string()))?
            .to_string();

        let result = {
            let mut memberships = self
                .memberships
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if memberships.contains_key(session_name) {
                JoinResult::AlreadyInSession
            } else {
                let mut sessions = self
                    .network
                    .sessions
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                match sessions.get_mut(&session_id) {
                    None => JoinResult::SessionDoesNotExist,
                    Some(s) if !s.accepts_joins() => JoinResult::SessionDoesNotExist,
                    Some(s) if s.open_connections() == 0 => JoinResult::SessionIsFull,
                    Some(s) => {
                        s.members.insert(*requester);
                        memberships.insert(
                            session_name.to_string(),
                            Membership::Guest {
                                session_id,
                                player: *requester,
                            },
                        );
                        JoinResult::Success
                    }
                }
            }
        };

        self.deliver(
            &runtime,
            ProviderCompletion::Join {
                session_name: session_name.to_string(),
                result,
            },
        );
        Ok(())
    }

    fn destroy_session(&self, session_name: &str) -> Result<(), SubmitError> {
        let runtime = current_runtime()?;
        let membership = self
            .memberships
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_name)
            .ok_or_else(|| SubmitError::NotFound(session_name.to_string()))?;

        let mut sessions = self
            .network
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match membership {
            Membership::Host { session_id } => {
                sessions.remove(&session_id);
            }
            Membership::Guest { session_id, player } => {
                if let Some(s) = sessions.get_mut(&session_id) {
                    s.members.remove(&player);
                }
            }
        }
        drop(sessions);

        self.deliver(
            &runtime,
            ProviderCompletion::Destroy {
                session_name: session_name.to_string(),
                success: true,
            },
        );
        Ok(())
    }

    fn start_session(&self, session_name: &str) -> Result<(), SubmitError> {
        let runtime = current_runtime()?;
        {
            let memberships = self
                .memberships
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let membership = memberships
                .get(session_name)
                .ok_or_else(|| SubmitError::NotFound(session_name.to_string()))?;

            if let Membership::Host { session_id } = membership {
                let mut sessions = self
                    .network
                    .sessions
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                let hosted = sessions
                    .get_mut(session_id)
                    .ok_or_else(|| SubmitError::NotFound(session_name.to_string()))?;
                if hosted.state != SessionState::Pending {
                    return Err(SubmitError::InvalidState {
                        session: session_name.to_string(),
                        state: hosted.state,
                    });
                }
                hosted.state = SessionState::InProgress;
            }
        }

        self.deliver(
            &runtime,
            ProviderCompletion::Start {
                session_name: session_name.to_string(),
                success: true,
            },
        );
        Ok(())
    }

    fn named_session(&self, session_name: &str) -> Option<SessionDescriptor> {
        let memberships = self
            .memberships
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let session_id = memberships.get(session_name)?.session_id();
        let sessions = self
            .network
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let hosted = sessions.get(session_id)?;

        Some(SessionDescriptor {
            session_name: session_name.to_string(),
            session_id: session_id.to_string(),
            settings: hosted.settings.clone(),
            state: hosted.state,
        })
    }

    fn resolve_connect_string(&self, session_name: &str) -> Option<String> {
        let memberships = self
            .memberships
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let session_id = memberships.get(session_name)?.session_id();
        self.network
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .map(HostedSession::address)
    }
}

/// Online subsystem exposing a [`LocalSessionProvider`].
pub struct LocalSubsystem {
    provider: Arc<LocalSessionProvider>,
}

impl LocalSubsystem {
    #[must_use]
    pub fn new(network: Arc<LocalNetwork>, owner_name: impl Into<String>) -> Self {
        Self {
            provider: Arc::new(LocalSessionProvider::new(network, owner_name)),
        }
    }

    #[must_use]
    pub fn provider(&self) -> Arc<LocalSessionProvider> {
        Arc::clone(&self.provider)
    }
}

impl OnlineSubsystem for LocalSubsystem {
    fn name(&self) -> &str {
        LOCAL_SUBSYSTEM_NAME
    }

    fn session_interface(&self) -> Option<Arc<dyn SessionProvider>> {
        let provider: Arc<dyn SessionProvider> = self.provider.clone();
        Some(provider)
    }
}
