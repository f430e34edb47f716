//! Multicast completion notifications with a bounded event history.

use std::{
    collections::VecDeque,
    sync::{
        PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    error::SessionError,
    provider::{JoinResult, OperationKind, SearchResult},
};

/// Capacity of each broadcast channel.
const CHANNEL_CAPACITY: usize = 1024;

/// Default number of events kept for late subscribers.
pub const DEFAULT_HISTORY_LIMIT: usize = 256;

/// Payload of create, destroy and start completions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    /// Why the operation failed, when it did.
    pub error: Option<SessionError>,
}

impl Outcome {
    #[must_use]
    pub const fn succeeded() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    #[must_use]
    pub const fn failed(error: SessionError) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }

    /// Outcome of an asynchronous provider callback.
    #[must_use]
    pub const fn from_provider(kind: OperationKind, success: bool) -> Self {
        if success {
            Self::succeeded()
        } else {
            Self::failed(SessionError::ProviderReportedFailure(kind))
        }
    }
}

/// Payload of find completions.
#[derive(Debug, Clone, PartialEq)]
pub struct FindOutcome {
    pub results: Vec<SearchResult>,
    pub success: bool,
    pub error: Option<SessionError>,
}

impl FindOutcome {
    #[must_use]
    pub const fn failed(error: SessionError) -> Self {
        Self {
            results: Vec::new(),
            success: false,
            error: Some(error),
        }
    }
}

/// Payload of join completions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub result: JoinResult,
    pub error: Option<SessionError>,
}

impl JoinOutcome {
    #[must_use]
    pub const fn failed(error: SessionError) -> Self {
        Self {
            result: JoinResult::UnknownError,
            error: Some(error),
        }
    }
}

/// Any completion, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    CreateComplete(Outcome),
    FindComplete(FindOutcome),
    JoinComplete(JoinOutcome),
    DestroyComplete(Outcome),
    StartComplete(Outcome),
}

impl SessionEvent {
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::CreateComplete(_) => OperationKind::Create,
            Self::FindComplete(_) => OperationKind::Find,
            Self::JoinComplete(_) => OperationKind::Join,
            Self::DestroyComplete(_) => OperationKind::Destroy,
            Self::StartComplete(_) => OperationKind::Start,
        }
    }

    #[must_use]
    pub const fn success(&self) -> bool {
        match self {
            Self::CreateComplete(o) | Self::DestroyComplete(o) | Self::StartComplete(o) => {
                o.success
            }
            Self::FindComplete(o) => o.success,
            Self::JoinComplete(o) => o.result.is_success(),
        }
    }
}

/// One multicast channel.
///
/// Sending never runs subscriber code; every subscriber sees every firing
/// unless it lags more than the channel capacity behind.
pub struct Channel<T> {
    sender: broadcast::Sender<T>,
    emitted: AtomicU64,
}

impl<T: Clone + Send + 'static> Channel<T> {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            emitted: AtomicU64::new(0),
        }
    }

    /// Fire the channel. Returns the number of subscribers reached.
    pub fn emit(&self, value: T) -> usize {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        self.sender.send(value).unwrap_or(0)
    }

    /// Get a receiver for future firings.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Stream of future firings, skipping over lag gaps.
    #[must_use]
    pub fn stream(&self) -> futures::stream::BoxStream<'static, T> {
        BroadcastStream::new(self.subscribe())
            .filter_map(|res| async move { res.ok() })
            .boxed()
    }

    /// Total firings so far.
    #[must_use]
    pub fn emit_count(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Completion channels for every operation kind.
pub struct Notifications {
    pub create: Channel<Outcome>,
    pub find: Channel<FindOutcome>,
    pub join: Channel<JoinOutcome>,
    pub destroy: Channel<Outcome>,
    pub start: Channel<Outcome>,
    events: Channel<SessionEvent>,
    history: RwLock<VecDeque<SessionEvent>>,
    history_limit: usize,
}

impl Default for Notifications {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl Notifications {
    /// Create the channels, keeping at most `history_limit` past events.
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self {
            create: Channel::new(),
            find: Channel::new(),
            join: Channel::new(),
            destroy: Channel::new(),
            start: Channel::new(),
            events: Channel::new(),
            history: RwLock::new(VecDeque::with_capacity(history_limit.min(32))),
            history_limit,
        }
    }

    /// Fire the channel for the event's kind, the combined channel and history.
    pub fn publish(&self, event: SessionEvent) {
        tracing::debug!(kind = %event.kind(), success = event.success(), "Publishing completion");

        {
            let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
            if self.history_limit > 0 {
                while history.len() >= self.history_limit {
                    history.pop_front();
                }
                history.push_back(event.clone());
            }
        }

        self.events.emit(event.clone());
        match event {
            SessionEvent::CreateComplete(o) => {
                self.create.emit(o);
            }
            SessionEvent::FindComplete(o) => {
                self.find.emit(o);
            }
            SessionEvent::JoinComplete(o) => {
                self.join.emit(o);
            }
            SessionEvent::DestroyComplete(o) => {
                self.destroy.emit(o);
            }
            SessionEvent::StartComplete(o) => {
                self.start.emit(o);
            }
        }
    }

    /// Firings of the given kind so far.
    #[must_use]
    pub fn emit_count(&self, kind: OperationKind) -> u64 {
        match kind {
            OperationKind::Create => self.create.emit_count(),
            OperationKind::Find => self.find.emit_count(),
            OperationKind::Join => self.join.emit_count(),
            OperationKind::Destroy => self.destroy.emit_count(),
            OperationKind::Start => self.start.emit_count(),
        }
    }

    /// Receiver for every completion, in emission order.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Snapshot of recent completions.
    #[must_use]
    pub fn history(&self) -> Vec<SessionEvent> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live completions.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, SessionEvent> {
        let (history, live) = (self.history(), self.events.stream());
        futures::stream::iter(history).chain(live).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_routes_to_kind_channel() {
        let notifications = Notifications::default();
        let mut create_rx = notifications.create.subscribe();
        let mut destroy_rx = notifications.destroy.subscribe();

        notifications.publish(SessionEvent::CreateComplete(Outcome::succeeded()));

        assert_eq!(create_rx.try_recv().unwrap(), Outcome::succeeded());
        assert!(destroy_rx.try_recv().is_err());
        assert_eq!(notifications.emit_count(OperationKind::Create), 1);
        assert_eq!(notifications.emit_count(OperationKind::Destroy), 0);
    }

    #[test]
    fn test_every_subscriber_sees_firing() {
        let notifications = Notifications::default();
        let mut rx1 = notifications.start.subscribe();
        let mut rx2 = notifications.start.subscribe();
        assert_eq!(notifications.start.subscriber_count(), 2);

        let failed = Outcome::failed(SessionError::Unavailable);
        notifications.publish(SessionEvent::StartComplete(failed.clone()));

        assert_eq!(rx1.try_recv().unwrap(), failed);
        assert_eq!(rx2.try_recv().unwrap(), failed);
    }

    #[test]
    fn test_history_is_bounded() {
        let notifications = Notifications::new(2);
        notifications.publish(SessionEvent::CreateComplete(Outcome::succeeded()));
        notifications.publish(SessionEvent::StartComplete(Outcome::succeeded()));
        notifications.publish(SessionEvent::DestroyComplete(Outcome::succeeded()));

        let kinds: Vec<_> = notifications.history().iter().map(SessionEvent::kind).collect();
        assert_eq!(kinds, vec![OperationKind::Start, OperationKind::Destroy]);
    }

    #[tokio::test]
    async fn test_history_plus_stream() {
        let notifications = Notifications::default();
        notifications.publish(SessionEvent::JoinComplete(JoinOutcome::failed(
            SessionError::Unavailable,
        )));

        let mut stream = notifications.history_plus_stream();
        notifications.publish(SessionEvent::FindComplete(FindOutcome::failed(
            SessionError::EmptyResult,
        )));

        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(first.kind(), OperationKind::Join);
        assert_eq!(second.kind(), OperationKind::Find);
        assert!(!second.success());
    }
}
