//! Session orchestrator: a single-flight lifecycle over a session provider.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use multiplayer_sessions_core::{
    ContractError, DelegateHandle, FindOutcome, JoinOutcome, JoinResult, NetworkMode,
    Notifications, OnlineSubsystem, OperationKind, Outcome, PlayerId, ProviderCallback,
    ProviderCompletion, SearchParams, SearchResult, SessionConfig, SessionDescriptor,
    SessionError, SessionEvent, SessionProvider, SessionSettings, SubmitError,
};

use crate::{
    config::SessionsConfig,
    lifecycle::{DestroyFollowUp, LifecycleEvent, SessionPhase, on_destroy_complete},
};

/// Registration occupying a pending operation slot.
struct PendingOp {
    ticket: u64,
    handle: DelegateHandle,
}

#[derive(Default)]
struct State {
    slots: [Option<PendingOp>; 5],
    next_ticket: u64,
    recreate: Option<SessionConfig>,
    phase: SessionPhase,
    last_config: Option<SessionConfig>,
    last_search: Vec<SearchResult>,
}

impl State {
    const fn occupied(&self, kind: OperationKind) -> bool {
        self.slots[kind.index()].is_some()
    }

    /// Release the slot if it still belongs to `ticket`.
    fn take_slot(&mut self, kind: OperationKind, ticket: u64) -> Option<DelegateHandle> {
        let slot = &mut self.slots[kind.index()];
        match slot {
            Some(pending) if pending.ticket == ticket => slot.take().map(|p| p.handle),
            _ => None,
        }
    }

    fn apply(&mut self, event: LifecycleEvent) {
        self.phase = self.phase.apply(event);
    }
}

struct Shared {
    provider: Option<Arc<dyn SessionProvider>>,
    session_name: String,
    network_mode: NetworkMode,
    build_unique_id: u32,
    local_player: PlayerId,
    state: Mutex<State>,
    notifications: Notifications,
}

/// What `create_session` decided under the lock.
enum CreatePlan {
    Busy,
    /// Recreate intent joined a destroy already in flight.
    Piggyback,
    DestroyFirst(u64),
    Create(u64, SessionConfig),
}

/// Orchestrates the lifecycle of the one session this process owns.
///
/// Every operation returns immediately; its result arrives as exactly one
/// notification on the matching channel of [`Self::notifications`]. Cloning
/// is cheap and clones share state.
#[derive(Clone)]
pub struct SessionOrchestrator {
    shared: Arc<Shared>,
}

impl SessionOrchestrator {
    /// Create an orchestrator over an injected provider.
    ///
    /// With `None`, every operation completes immediately with
    /// [`SessionError::Unavailable`].
    #[must_use]
    pub fn new(provider: Option<Arc<dyn SessionProvider>>, config: &SessionsConfig) -> Self {
        Self::build(provider, config, config.resolve_network_mode(None))
    }

    /// Create an orchestrator over a platform subsystem's session interface.
    #[must_use]
    pub fn from_subsystem(subsystem: &dyn OnlineSubsystem, config: &SessionsConfig) -> Self {
        let provider = subsystem.session_interface();
        if provider.is_none() {
            tracing::warn!(
                subsystem = subsystem.name(),
                "Online subsystem has no session interface"
            );
        }
        Self::build(
            provider,
            config,
            config.resolve_network_mode(Some(subsystem.name())),
        )
    }

    fn build(
        provider: Option<Arc<dyn SessionProvider>>,
        config: &SessionsConfig,
        network_mode: NetworkMode,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                provider,
                session_name: config.session_name.clone(),
                network_mode,
                build_unique_id: config.build_unique_id,
                local_player: config.local_player.unwrap_or_else(PlayerId::new_v4),
                state: Mutex::new(State::default()),
                notifications: Notifications::new(config.history_limit),
            }),
        }
    }

    /// Completion channels.
    #[must_use]
    pub fn notifications(&self) -> &Notifications {
        &self.shared.notifications
    }

    #[must_use]
    pub fn session_name(&self) -> &str {
        &self.shared.session_name
    }

    #[must_use]
    pub fn network_mode(&self) -> NetworkMode {
        self.shared.network_mode
    }

    #[must_use]
    pub fn local_player(&self) -> PlayerId {
        self.shared.local_player
    }

    #[must_use]
    pub fn is_provider_available(&self) -> bool {
        self.shared.provider.is_some()
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    /// Kinds with an operation in flight.
    #[must_use]
    pub fn pending_operations(&self) -> Vec<OperationKind> {
        let state = self.lock();
        OperationKind::ALL
            .into_iter()
            .filter(|kind| state.occupied(*kind))
            .collect()
    }

    #[must_use]
    pub fn is_pending(&self, kind: OperationKind) -> bool {
        self.lock().occupied(kind)
    }

    #[must_use]
    pub fn has_recreate_intent(&self) -> bool {
        self.lock().recreate.is_some()
    }

    /// Configuration of the last submitted create.
    #[must_use]
    pub fn last_config(&self) -> Option<SessionConfig> {
        self.lock().last_config.clone()
    }

    /// Results of the last completed search.
    #[must_use]
    pub fn last_search_results(&self) -> Vec<SearchResult> {
        self.lock().last_search.clone()
    }

    /// The provider's descriptor for the current session.
    #[must_use]
    pub fn current_session(&self) -> Option<SessionDescriptor> {
        self.shared
            .provider
            .as_ref()
            .and_then(|p| p.named_session(&self.shared.session_name))
    }

    /// Travel address for the current session, after a successful join.
    #[must_use]
    pub fn connect_address(&self) -> Option<String> {
        self.shared
            .provider
            .as_ref()
            .and_then(|p| p.resolve_connect_string(&self.shared.session_name))
    }

    /// Host a new session.
    ///
    /// If a session already exists it is destroyed first and the new one is
    /// created from `config` once the destroy succeeds.
    ///
    /// # Errors
    /// Returns error if `config` requests zero connections.
    pub fn create_session(&self, config: SessionConfig) -> Result<(), ContractError> {
        if !config.is_valid() {
            return Err(ContractError::InvalidConfig);
        }
        let Some(provider) = self.provider() else {
            self.unavailable(OperationKind::Create);
            return Ok(());
        };

        // Queried outside the state lock: providers may take their own locks here.
        // A destroy completing concurrently only makes this check conservative.
        let stale = provider.named_session(&self.shared.session_name).is_some();
        let plan = {
            let mut state = self.lock();
            if state.occupied(OperationKind::Create) || state.recreate.is_some() {
                CreatePlan::Busy
            } else if stale {
                tracing::info!(
                    session = %self.shared.session_name,
                    "Session exists, destroying it before recreating"
                );
                state.recreate = Some(config);
                if state.occupied(OperationKind::Destroy) {
                    state.apply(LifecycleEvent::RecreateRequested);
                    CreatePlan::Piggyback
                } else {
                    let ticket = self.reserve(&mut state, &provider, OperationKind::Destroy);
                    state.apply(LifecycleEvent::DestroySubmitted {
                        pending_recreate: true,
                    });
                    CreatePlan::DestroyFirst(ticket)
                }
            } else {
                let ticket = self.reserve_create(&mut state, &provider, &config);
                CreatePlan::Create(ticket, config)
            }
        };

        match plan {
            CreatePlan::Busy => self.busy(OperationKind::Create),
            CreatePlan::Piggyback => {
                tracing::debug!("Recreate will follow the destroy already in flight");
            }
            CreatePlan::DestroyFirst(ticket) => self.submit_destroy(&provider, ticket),
            CreatePlan::Create(ticket, config) => self.submit_create(&provider, ticket, &config),
        }
        Ok(())
    }

    /// Search for sessions to join.
    pub fn find_sessions(&self, max_search_results: u32) {
        let Some(provider) = self.provider() else {
            self.unavailable(OperationKind::Find);
            return;
        };
        let Some(ticket) = self.try_reserve(&provider, OperationKind::Find, |_| {}) else {
            self.busy(OperationKind::Find);
            return;
        };

        let search = SearchParams::presence(max_search_results, self.shared.network_mode);
        let requester = self.shared.local_player;
        tracing::info!(max_search_results, lan = search.is_lan_query, "Searching for sessions");
        self.submit(&provider, OperationKind::Find, ticket, |p| {
            p.find_sessions(&requester, &search)
        });
    }

    /// Join a session from a search result.
    ///
    /// # Errors
    /// Returns error if `target` carries no connection token.
    pub fn join_session(&self, target: &SearchResult) -> Result<(), ContractError> {
        if !target.is_joinable() {
            return Err(ContractError::InvalidSearchResult);
        }
        let Some(provider) = self.provider() else {
            self.unavailable(OperationKind::Join);
            return Ok(());
        };
        let Some(ticket) = self.try_reserve(&provider, OperationKind::Join, |_| {}) else {
            self.busy(OperationKind::Join);
            return Ok(());
        };

        let requester = self.shared.local_player;
        let session_name = &self.shared.session_name;
        tracing::info!(session_id = %target.session_id, "Joining session");
        self.submit(&provider, OperationKind::Join, ticket, |p| {
            p.join_session(&requester, session_name, target)
        });
        Ok(())
    }

    /// Tear down the current session.
    pub fn destroy_session(&self) {
        let Some(provider) = self.provider() else {
            self.unavailable(OperationKind::Destroy);
            return;
        };
        let reserved = self.try_reserve(&provider, OperationKind::Destroy, |state| {
            let pending_recreate = state.recreate.is_some();
            state.apply(LifecycleEvent::DestroySubmitted { pending_recreate });
        });
        match reserved {
            Some(ticket) => self.submit_destroy(&provider, ticket),
            None => self.busy(OperationKind::Destroy),
        }
    }

    /// Start the current session.
    pub fn start_session(&self) {
        let Some(provider) = self.provider() else {
            self.unavailable(OperationKind::Start);
            return;
        };
        let Some(ticket) = self.try_reserve(&provider, OperationKind::Start, |state| {
            state.apply(LifecycleEvent::StartSubmitted);
        }) else {
            self.busy(OperationKind::Start);
            return;
        };

        let session_name = &self.shared.session_name;
        self.submit(&provider, OperationKind::Start, ticket, |p| {
            p.start_session(session_name)
        });
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn provider(&self) -> Option<Arc<dyn SessionProvider>> {
        self.shared.provider.clone()
    }

    fn publish(&self, event: SessionEvent) {
        self.shared.notifications.publish(event);
    }

    /// Register a completion callback and occupy the slot for `kind`.
    ///
    /// The caller has checked the slot is free.
    fn reserve(
        &self,
        state: &mut State,
        provider: &Arc<dyn SessionProvider>,
        kind: OperationKind,
    ) -> u64 {
        let ticket = state.next_ticket;
        state.next_ticket += 1;

        let handle = provider.register(kind, self.completion_callback(kind, ticket));
        tracing::debug!(%kind, ticket, handle = handle.id(), "Registered completion callback");
        state.slots[kind.index()] = Some(PendingOp { ticket, handle });
        ticket
    }

    fn reserve_create(
        &self,
        state: &mut State,
        provider: &Arc<dyn SessionProvider>,
        config: &SessionConfig,
    ) -> u64 {
        let ticket = self.reserve(state, provider, OperationKind::Create);
        state.last_config = Some(config.clone());
        state.apply(LifecycleEvent::CreateSubmitted);
        ticket
    }

    /// Occupy the slot for `kind` unless it is already taken.
    fn try_reserve(
        &self,
        provider: &Arc<dyn SessionProvider>,
        kind: OperationKind,
        prepare: impl FnOnce(&mut State),
    ) -> Option<u64> {
        let mut state = self.lock();
        if state.occupied(kind) {
            return None;
        }
        let ticket = self.reserve(&mut state, provider, kind);
        prepare(&mut state);
        Some(ticket)
    }

    fn completion_callback(&self, kind: OperationKind, ticket: u64) -> ProviderCallback {
        let shared = Arc::downgrade(&self.shared);
        Arc::new(move |completion: ProviderCompletion| {
            if let Some(shared) = shared.upgrade() {
                Self { shared }.on_completion(kind, ticket, completion);
            }
        })
    }

    /// Hand a request to the provider, unwinding the slot if it refuses.
    fn submit<F>(&self, provider: &Arc<dyn SessionProvider>, kind: OperationKind, ticket: u64, request: F)
    where
        F: FnOnce(&dyn SessionProvider) -> Result<(), SubmitError>,
    {
        if let Err(e) = request(provider.as_ref()) {
            self.reject(provider, kind, ticket, &e);
        }
    }

    fn submit_create(&self, provider: &Arc<dyn SessionProvider>, ticket: u64, config: &SessionConfig) {
        let settings = SessionSettings::from_config(
            config,
            self.shared.network_mode,
            self.shared.build_unique_id,
        );
        let requester = self.shared.local_player;
        let session_name = &self.shared.session_name;
        tracing::info!(
            session = %session_name,
            max_public_connections = config.max_public_connections,
            match_type = %config.match_type,
            "Creating session"
        );
        self.submit(provider, OperationKind::Create, ticket, |p| {
            p.create_session(&requester, session_name, &settings)
        });
    }

    fn submit_destroy(&self, provider: &Arc<dyn SessionProvider>, ticket: u64) {
        let session_name = &self.shared.session_name;
        tracing::info!(session = %session_name, "Destroying session");
        self.submit(provider, OperationKind::Destroy, ticket, |p| {
            p.destroy_session(session_name)
        });
    }

    /// Synchronous rejection path. The provider will not call back.
    fn reject(
        &self,
        provider: &Arc<dyn SessionProvider>,
        kind: OperationKind,
        ticket: u64,
        error: &SubmitError,
    ) {
        let (handle, abandoned) = {
            let mut state = self.lock();
            let Some(handle) = state.take_slot(kind, ticket) else {
                tracing::debug!(%kind, ticket, "Slot already released by a callback");
                return;
            };
            let mut abandoned = false;
            match kind {
                OperationKind::Create => state.apply(LifecycleEvent::CreateCompleted(false)),
                OperationKind::Start => state.apply(LifecycleEvent::StartCompleted(false)),
                OperationKind::Destroy => {
                    abandoned = state.recreate.take().is_some();
                    state.apply(LifecycleEvent::DestroyCompleted);
                }
                OperationKind::Find | OperationKind::Join => {}
            }
            (handle, abandoned)
        };
        provider.unregister(handle);

        tracing::warn!(%kind, error = %error, "Provider rejected request");
        let failure = SessionError::SubmissionRejected {
            kind,
            reason: error.to_string(),
        };
        self.publish(failure_event(kind, failure));
        if abandoned {
            self.publish(SessionEvent::CreateComplete(Outcome::failed(
                SessionError::StaleSessionNotDestroyed,
            )));
        }
    }

    fn on_completion(&self, kind: OperationKind, ticket: u64, completion: ProviderCompletion) {
        if completion.kind() != kind {
            tracing::debug!(%kind, got = %completion.kind(), "Ignoring completion of another kind");
            return;
        }
        let Some(handle) = self.lock().take_slot(kind, ticket) else {
            tracing::debug!(%kind, ticket, "Ignoring completion with no registered slot");
            return;
        };
        if let Some(provider) = &self.shared.provider {
            provider.unregister(handle);
        }

        match completion {
            ProviderCompletion::Create { success, .. } => self.finish_create(success),
            ProviderCompletion::Find { success, results } => self.finish_find(success, results),
            ProviderCompletion::Join { result, .. } => self.finish_join(result),
            ProviderCompletion::Destroy { success, .. } => self.finish_destroy(success),
            ProviderCompletion::Start { success, .. } => self.finish_start(success),
        }
    }

    fn finish_create(&self, success: bool) {
        self.lock().apply(LifecycleEvent::CreateCompleted(success));
        if success {
            tracing::info!(session = %self.shared.session_name, "Session created");
        } else {
            tracing::warn!(session = %self.shared.session_name, "Session creation failed");
        }
        self.publish(SessionEvent::CreateComplete(Outcome::from_provider(
            OperationKind::Create,
            success,
        )));
    }

    fn finish_find(&self, success: bool, results: Vec<SearchResult>) {
        self.lock().last_search.clone_from(&results);
        tracing::info!(count = results.len(), success, "Session search finished");

        let outcome = if results.is_empty() {
            FindOutcome::failed(SessionError::EmptyResult)
        } else {
            FindOutcome {
                results,
                success,
                error: (!success).then_some(SessionError::ProviderReportedFailure(OperationKind::Find)),
            }
        };
        self.publish(SessionEvent::FindComplete(outcome));
    }

    fn finish_join(&self, result: JoinResult) {
        self.lock()
            .apply(LifecycleEvent::JoinCompleted(result.is_success()));
        tracing::info!(?result, "Join finished");
        let error = (!result.is_success())
            .then_some(SessionError::ProviderReportedFailure(OperationKind::Join));
        self.publish(SessionEvent::JoinComplete(JoinOutcome { result, error }));
    }

    fn finish_destroy(&self, success: bool) {
        let (follow_up, recreate_ticket) = {
            let mut state = self.lock();
            let intent = state.recreate.take();
            state.apply(LifecycleEvent::DestroyCompleted);
            let follow_up = on_destroy_complete(success, intent);

            let ticket = match (&follow_up, &self.shared.provider) {
                (DestroyFollowUp::Recreate(config), Some(provider)) => {
                    Some(self.reserve_create(&mut state, provider, config))
                }
                _ => None,
            };
            (follow_up, ticket)
        };

        if success {
            tracing::info!(session = %self.shared.session_name, "Session destroyed");
        } else {
            tracing::warn!(session = %self.shared.session_name, "Session destroy failed");
        }
        self.publish(SessionEvent::DestroyComplete(Outcome::from_provider(
            OperationKind::Destroy,
            success,
        )));

        match (follow_up, recreate_ticket, &self.shared.provider) {
            (DestroyFollowUp::Recreate(config), Some(ticket), Some(provider)) => {
                self.submit_create(provider, ticket, &config);
            }
            (DestroyFollowUp::AbandonRecreate, ..) => {
                tracing::warn!("Stale session survived, dropping pending recreate");
                self.publish(SessionEvent::CreateComplete(Outcome::failed(
                    SessionError::StaleSessionNotDestroyed,
                )));
            }
            _ => {}
        }
    }

    fn finish_start(&self, success: bool) {
        self.lock().apply(LifecycleEvent::StartCompleted(success));
        tracing::info!(session = %self.shared.session_name, success, "Session start finished");
        self.publish(SessionEvent::StartComplete(Outcome::from_provider(
            OperationKind::Start,
            success,
        )));
    }

    fn unavailable(&self, kind: OperationKind) {
        tracing::warn!(%kind, "No session provider available");
        self.publish(failure_event(kind, SessionError::Unavailable));
    }

    fn busy(&self, kind: OperationKind) {
        tracing::warn!(%kind, "Operation already in flight, rejecting request");
        self.publish(failure_event(kind, SessionError::Busy(kind)));
    }
}

fn failure_event(kind: OperationKind, error: SessionError) -> SessionEvent {
    match kind {
        OperationKind::Create => SessionEvent::CreateComplete(Outcome::failed(error)),
        OperationKind::Find => SessionEvent::FindComplete(FindOutcome::failed(error)),
        OperationKind::Join => SessionEvent::JoinComplete(JoinOutcome::failed(error)),
        OperationKind::Destroy => SessionEvent::DestroyComplete(Outcome::failed(error)),
        OperationKind::Start => SessionEvent::StartComplete(Outcome::failed(error)),
    }
}
