//! Session provider capability and the data it exchanges.

use std::{fmt, sync::Arc};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::settings::{PlayerId, SearchParams, SessionSettings};

/// Kind of lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Find,
    Join,
    Destroy,
    Start,
}

impl OperationKind {
    /// Every kind, in slot order.
    pub const ALL: [Self; 5] = [
        Self::Create,
        Self::Find,
        Self::Join,
        Self::Destroy,
        Self::Start,
    ];

    /// Position of this kind in [`Self::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Create => 0,
            Self::Find => 1,
            Self::Join => 2,
            Self::Destroy => 3,
            Self::Start => 4,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Find => "find",
            Self::Join => "join",
            Self::Destroy => "destroy",
            Self::Start => "start",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owned registration token returned by [`SessionProvider::register`].
///
/// Not clonable: releasing it via [`SessionProvider::unregister`] consumes it,
/// so a registration can only be released once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DelegateHandle(u64);

impl DelegateHandle {
    /// Mint a handle. Only providers should call this.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.0
    }
}

/// Opaque token a provider uses to reach a found session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionToken(Bytes);

impl ConnectionToken {
    #[must_use]
    pub const fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for ConnectionToken {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<String> for ConnectionToken {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

/// One entry of a search result set.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Provider-assigned session identifier.
    pub session_id: String,
    /// Display name of the hosting player.
    pub owner_name: String,
    /// Settings the session was advertised with.
    pub settings: SessionSettings,
    pub open_public_connections: u32,
    pub ping_ms: Option<u32>,
    /// Token consumed by `join_session`.
    pub connection: ConnectionToken,
}

impl SearchResult {
    /// The advertised match type tag.
    #[must_use]
    pub fn match_type(&self) -> Option<&str> {
        self.settings.match_type()
    }

    /// Whether this entry can be handed to a join request.
    #[must_use]
    pub fn is_joinable(&self) -> bool {
        !self.connection.is_empty()
    }
}

/// Result of a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinResult {
    Success,
    SessionIsFull,
    SessionDoesNotExist,
    CouldNotRetrieveAddress,
    AlreadyInSession,
    UnknownError,
}

impl JoinResult {
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Provider-side state of a named session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, not yet started.
    Pending,
    /// Start requested.
    Starting,
    /// Match under way.
    InProgress,
    /// Destroy requested.
    Destroying,
}

/// Opaque handle to a session the provider is tracking.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDescriptor {
    pub session_name: String,
    pub session_id: String,
    pub settings: SessionSettings,
    pub state: SessionState,
}

/// Asynchronous completion delivered by a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCompletion {
    Create { session_name: String, success: bool },
    Find { success: bool, results: Vec<SearchResult> },
    Join { session_name: String, result: JoinResult },
    Destroy { session_name: String, success: bool },
    Start { session_name: String, success: bool },
}

impl ProviderCompletion {
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Create { .. } => OperationKind::Create,
            Self::Find { .. } => OperationKind::Find,
            Self::Join { .. } => OperationKind::Join,
            Self::Destroy { .. } => OperationKind::Destroy,
            Self::Start { .. } => OperationKind::Start,
        }
    }
}

/// Callback registered for one operation kind.
pub type ProviderCallback = Arc<dyn Fn(ProviderCompletion) + Send + Sync>;

/// Synchronous rejection of a submitted request.
///
/// When a submission returns this, the provider will not invoke any
/// callback for it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("Session already exists: {0}")]
    AlreadyExists(String),
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Session {session} is {state:?}")]
    InvalidState { session: String, state: SessionState },
    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// Online services capability sessions are hosted on.
///
/// Every submission either returns `Err` synchronously, in which case no
/// callback follows, or returns `Ok` and later invokes each callback
/// registered for its kind exactly once.
///
/// Callbacks may run on any thread but must not be invoked from inside
/// `register`, or while the provider holds a lock that `unregister` needs.
pub trait SessionProvider: Send + Sync {
    /// Register a completion callback for one operation kind.
    fn register(&self, kind: OperationKind, callback: ProviderCallback) -> DelegateHandle;

    /// Release a registration. Returns false if the handle was unknown.
    fn unregister(&self, handle: DelegateHandle) -> bool;

    /// Submit a create request.
    ///
    /// # Errors
    /// Returns error if the provider refuses the request outright.
    fn create_session(
        &self,
        requester: &PlayerId,
        session_name: &str,
        settings: &SessionSettings,
    ) -> Result<(), SubmitError>;

    /// Submit a search.
    ///
    /// # Errors
    /// Returns error if the provider refuses the request outright.
    fn find_sessions(&self, requester: &PlayerId, search: &SearchParams) -> Result<(), SubmitError>;

    /// Submit a join for a search result.
    ///
    /// # Errors
    /// Returns error if the provider refuses the request outright.
    fn join_session(
        &self,
        requester: &PlayerId,
        session_name: &str,
        target: &SearchResult,
    ) -> Result<(), SubmitError>;

    /// Submit a destroy of the named session.
    ///
    /// # Errors
    /// Returns error if the provider refuses the request outright.
    fn destroy_session(&self, session_name: &str) -> Result<(), SubmitError>;

    /// Submit a start of the named session.
    ///
    /// # Errors
    /// Returns error if the provider refuses the request outright.
    fn start_session(&self, session_name: &str) -> Result<(), SubmitError>;

    /// Look up the named session, if the provider tracks one.
    fn named_session(&self, session_name: &str) -> Option<SessionDescriptor>;

    /// Travel address for a joined session.
    fn resolve_connect_string(&self, session_name: &str) -> Option<String>;
}

/// Platform online services entry point.
pub trait OnlineSubsystem: Send + Sync {
    /// Subsystem name, e.g. `NULL` for the LAN backend.
    fn name(&self) -> &str;

    /// The session capability, absent when no backend is configured.
    fn session_interface(&self) -> Option<Arc<dyn SessionProvider>>;
}
