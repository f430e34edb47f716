//! Scriptable provider that completes operations on command.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use multiplayer_sessions_core::{
    DelegateHandle, NetworkMode, OperationKind, PlayerId, ProviderCallback, ProviderCompletion,
    SearchParams, SearchResult, SessionConfig, SessionDescriptor, SessionProvider, SessionSettings,
    SessionState, SubmitError,
};

/// A call the provider received.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    Register(OperationKind),
    Unregister(OperationKind),
    Create {
        session_name: String,
        settings: SessionSettings,
    },
    Find(SearchParams),
    Join {
        session_name: String,
        session_id: String,
    },
    Destroy(String),
    Start(String),
}

impl ProviderCall {
    /// Whether this is a request submission rather than callback bookkeeping.
    #[must_use]
    pub const fn is_submission(&self) -> bool {
        !matches!(self, Self::Register(_) | Self::Unregister(_))
    }
}

#[derive(Default)]
struct Inner {
    callbacks: HashMap<u64, (OperationKind, ProviderCallback)>,
    next_handle: u64,
    calls: Vec<ProviderCall>,
    rejections: HashMap<OperationKind, SubmitError>,
    named: Option<SessionDescriptor>,
    submitted_settings: Option<SessionSettings>,
    connect_string: Option<String>,
}

/// Provider whose operations only complete when the test says so.
///
/// Submissions are recorded and accepted unless a rejection is armed for
/// their kind; [`Self::complete`] then delivers a completion to every
/// callback registered for its kind. The named session tracks successful
/// create and destroy completions.
#[derive(Default)]
pub struct ManualProvider {
    inner: Mutex<Inner>,
}

impl ManualProvider {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A provider that already tracks a session under `session_name`.
    #[must_use]
    pub fn with_session(session_name: &str) -> Arc<Self> {
        let provider = Self::new();
        provider.set_named_session(Some(descriptor(session_name, default_settings())));
        provider
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_named_session(&self, descriptor: Option<SessionDescriptor>) {
        self.lock().named = descriptor;
    }

    pub fn set_connect_string(&self, address: Option<String>) {
        self.lock().connect_string = address;
    }

    /// Synchronously reject every submission of `kind` until [`Self::accept`].
    pub fn reject(&self, kind: OperationKind, error: SubmitError) {
        self.lock().rejections.insert(kind, error);
    }

    pub fn accept(&self, kind: OperationKind) {
        self.lock().rejections.remove(&kind);
    }

    /// Every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    /// Submissions received so far, without callback bookkeeping.
    #[must_use]
    pub fn submissions(&self) -> Vec<ProviderCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.is_submission())
            .cloned()
            .collect()
    }

    /// Number of live registrations for `kind`.
    #[must_use]
    pub fn registered(&self, kind: OperationKind) -> usize {
        self.lock()
            .callbacks
            .values()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    /// Live callbacks for `kind`.
    #[must_use]
    pub fn callbacks(&self, kind: OperationKind) -> Vec<ProviderCallback> {
        self.lock()
            .callbacks
            .values()
            .filter(|(k, _)| *k == kind)
            .map(|(_, cb)| Arc::clone(cb))
            .collect()
    }

    /// Deliver a completion. Returns the number of callbacks invoked.
    pub fn complete(&self, completion: ProviderCompletion) -> usize {
        let callbacks = {
            let mut inner = self.lock();
            match &completion {
                ProviderCompletion::Create {
                    session_name,
                    success: true,
                } => {
                    let settings = inner
                        .submitted_settings
                        .clone()
                        .unwrap_or_else(default_settings);
                    inner.named = Some(descriptor(session_name, settings));
                }
                ProviderCompletion::Destroy { success: true, .. } => inner.named = None,
                ProviderCompletion::Start { success: true, .. } => {
                    if let Some(named) = inner.named.as_mut() {
                        named.state = SessionState::InProgress;
                    }
                }
                _ => {}
            }

            let kind = completion.kind();
            inner
                .callbacks
                .values()
                .filter(|(k, _)| *k == kind)
                .map(|(_, cb)| Arc::clone(cb))
                .collect::<Vec<_>>()
        };

        for callback in &callbacks {
            callback(completion.clone());
        }
        callbacks.len()
    }

    fn submit(&self, kind: OperationKind, call: ProviderCall) -> Result<(), SubmitError> {
        let mut inner = self.lock();
        inner.calls.push(call);
        inner.rejections.get(&kind).cloned().map_or(Ok(()), Err)
    }
}

fn default_settings() -> SessionSettings {
    SessionSettings::from_config(&SessionConfig::default(), NetworkMode::default(), 1)
}

fn descriptor(session_name: &str, settings: SessionSettings) -> SessionDescriptor {
    SessionDescriptor {
        session_name: session_name.to_string(),
        session_id: format!("manual-{session_name}"),
        settings,
        state: SessionState::Pending,
    }
}

impl SessionProvider for ManualProvider {
    fn register(&self, kind: OperationKind, callback: ProviderCallback) -> DelegateHandle {
        let mut inner = self.lock();
        inner.next_handle += 1;
        let id = inner.next_handle;
        inner.callbacks.insert(id, (kind, callback));
        inner.calls.push(ProviderCall::Register(kind));
        DelegateHandle::new(id)
    }

    fn unregister(&self, handle: DelegateHandle) -> bool {
        let mut inner = self.lock();
        match inner.callbacks.remove(&handle.id()) {
            Some((kind, _)) => {
                inner.calls.push(ProviderCall::Unregister(kind));
                true
            }
            None => false,
        }
    }

    fn create_session(
        &self,
        _requester: &PlayerId,
        session_name: &str,
        settings: &SessionSettings,
    ) -> Result<(), SubmitError> {
        let result = self.submit(
            OperationKind::Create,
            ProviderCall::Create {
                session_name: session_name.to_string(),
                settings: settings.clone(),
            },
        );
        if result.is_ok() {
            self.lock().submitted_settings = Some(settings.clone());
        }
        result
    }

    fn find_sessions(&self, _requester: &PlayerId, search: &SearchParams) -> Result<(), SubmitError> {
        self.submit(OperationKind::Find, ProviderCall::Find(search.clone()))
    }

    fn join_session(
        &self,
        _requester: &PlayerId,
        session_name: &str,
        target: &SearchResult,
    ) -> Result<(), SubmitError> {
        self.submit(
            OperationKind::Join,
            ProviderCall::Join {
                session_name: session_name.to_string(),
                session_id: target.session_id.clone(),
            },
        )
    }

    fn destroy_session(&self, session_name: &str) -> Result<(), SubmitError> {
        self.submit(
            OperationKind::Destroy,
            ProviderCall::Destroy(session_name.to_string()),
        )
    }

    fn start_session(&self, session_name: &str) -> Result<(), SubmitError> {
        self.submit(
            OperationKind::Start,
            ProviderCall::Start(session_name.to_string()),
        )
    }

    fn named_session(&self, session_name: &str) -> Option<SessionDescriptor> {
        self.lock()
            .named
            .clone()
            .filter(|named| named.session_name == session_name)
    }

    fn resolve_connect_string(&self, _session_name: &str) -> Option<String> {
        self.lock().connect_string.clone()
    }
}
