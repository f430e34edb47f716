//! Core abstractions for multiplayer session management.
//!
//! This crate provides the fundamental building blocks:
//! - `SessionConfig` / `SessionSettings` - What a session request looks like
//! - `SessionProvider` - The online services capability sessions are hosted on
//! - `Notifications` - Per-operation multicast completion channels
//! - `SessionError` - Failure taxonomy carried by completion payloads

pub mod error;
pub mod notify;
pub mod provider;
pub mod settings;

pub use error::{ContractError, SessionError};
pub use notify::{FindOutcome, JoinOutcome, Notifications, Outcome, SessionEvent};
pub use provider::{
    ConnectionToken, DelegateHandle, JoinResult, OnlineSubsystem, OperationKind,
    ProviderCallback, ProviderCompletion, SearchResult, SessionDescriptor, SessionProvider,
    SessionState, SubmitError,
};
pub use settings::{
    DEFAULT_MATCH_TYPE, DEFAULT_MAX_PUBLIC_CONNECTIONS, MATCH_TYPE_KEY, NetworkMode, PlayerId,
    SearchParams, SessionConfig, SessionSettings,
};
