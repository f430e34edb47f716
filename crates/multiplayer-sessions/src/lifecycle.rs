//! Coarse session lifecycle and the destroy-then-recreate transition.

use multiplayer_sessions_core::SessionConfig;

/// Coarse state of the current session.
///
/// Finding and joining do not change the phase; they are reported as
/// pending operations instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionPhase {
    #[default]
    NoSession,
    Creating,
    Active,
    Starting,
    Started,
    Destroying {
        /// A create is waiting for this destroy to finish.
        pending_recreate: bool,
    },
}

/// Input to [`SessionPhase::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    CreateSubmitted,
    CreateCompleted(bool),
    StartSubmitted,
    StartCompleted(bool),
    DestroySubmitted { pending_recreate: bool },
    /// A create piggybacked on a destroy already in flight.
    RecreateRequested,
    DestroyCompleted,
    JoinCompleted(bool),
}

impl SessionPhase {
    /// Next phase after `event`.
    #[must_use]
    pub const fn apply(self, event: LifecycleEvent) -> Self {
        use LifecycleEvent as E;

        match (self, event) {
            (_, E::CreateSubmitted) => Self::Creating,
            (Self::Creating, E::CreateCompleted(true)) => Self::Active,
            (Self::Creating, E::CreateCompleted(false)) => Self::NoSession,
            (Self::Active | Self::Started, E::StartSubmitted) => Self::Starting,
            (Self::Starting, E::StartCompleted(true)) => Self::Started,
            (Self::Starting, E::StartCompleted(false)) => Self::Active,
            (_, E::DestroySubmitted { pending_recreate }) => Self::Destroying { pending_recreate },
            (Self::Destroying { .. }, E::RecreateRequested) => Self::Destroying {
                pending_recreate: true,
            },
            // Terminal for the session, whatever the destroy's result.
            (Self::Destroying { .. }, E::DestroyCompleted) => Self::NoSession,
            // A create or start submitted after the destroy owns the phase now.
            (phase, E::DestroyCompleted) => phase,
            (Self::NoSession, E::JoinCompleted(true)) => Self::Active,
            (phase, _) => phase,
        }
    }

    #[must_use]
    pub const fn has_session(self) -> bool {
        !matches!(self, Self::NoSession)
    }
}

/// What follows a destroy completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyFollowUp {
    /// No create was waiting.
    Nothing,
    /// Submit the saved configuration.
    Recreate(SessionConfig),
    /// The waiting create fails: the stale session is still there.
    AbandonRecreate,
}

/// Decide the follow-up of a destroy given the taken recreate intent.
///
/// The intent is consumed in every case, so a later unrelated destroy can
/// never replay it.
#[must_use]
pub fn on_destroy_complete(success: bool, intent: Option<SessionConfig>) -> DestroyFollowUp {
    match (success, intent) {
        (_, None) => DestroyFollowUp::Nothing,
        (true, Some(config)) => DestroyFollowUp::Recreate(config),
        (false, Some(_)) => DestroyFollowUp::AbandonRecreate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lifetime() {
        let phase = SessionPhase::default()
            .apply(LifecycleEvent::CreateSubmitted)
            .apply(LifecycleEvent::CreateCompleted(true));
        assert_eq!(phase, SessionPhase::Active);

        let phase = phase
            .apply(LifecycleEvent::StartSubmitted)
            .apply(LifecycleEvent::StartCompleted(true));
        assert_eq!(phase, SessionPhase::Started);

        let phase = phase.apply(LifecycleEvent::DestroySubmitted {
            pending_recreate: false,
        });
        assert_eq!(
            phase,
            SessionPhase::Destroying {
                pending_recreate: false
            }
        );
        assert_eq!(phase.apply(LifecycleEvent::DestroyCompleted), SessionPhase::NoSession);
    }

    #[test]
    fn test_failures_fall_back() {
        let creating = SessionPhase::NoSession.apply(LifecycleEvent::CreateSubmitted);
        assert_eq!(
            creating.apply(LifecycleEvent::CreateCompleted(false)),
            SessionPhase::NoSession
        );

        let starting = SessionPhase::Active.apply(LifecycleEvent::StartSubmitted);
        assert_eq!(
            starting.apply(LifecycleEvent::StartCompleted(false)),
            SessionPhase::Active
        );
    }

    #[test]
    fn test_recreate_piggyback() {
        let phase = SessionPhase::Active
            .apply(LifecycleEvent::DestroySubmitted {
                pending_recreate: false,
            })
            .apply(LifecycleEvent::RecreateRequested);
        assert_eq!(
            phase,
            SessionPhase::Destroying {
                pending_recreate: true
            }
        );
        assert_eq!(
            SessionPhase::NoSession.apply(LifecycleEvent::RecreateRequested),
            SessionPhase::NoSession
        );
    }

    #[test]
    fn test_destroy_completion_after_new_create() {
        let phase = SessionPhase::Active
            .apply(LifecycleEvent::DestroySubmitted {
                pending_recreate: false,
            })
            .apply(LifecycleEvent::CreateSubmitted)
            .apply(LifecycleEvent::DestroyCompleted);
        assert_eq!(phase, SessionPhase::Creating);
        assert_eq!(
            phase.apply(LifecycleEvent::CreateCompleted(true)),
            SessionPhase::Active
        );

        // The new create may also finish first.
        assert_eq!(
            SessionPhase::Active.apply(LifecycleEvent::DestroyCompleted),
            SessionPhase::Active
        );
        assert_eq!(
            SessionPhase::Started.apply(LifecycleEvent::DestroyCompleted),
            SessionPhase::Started
        );
    }

    #[test]
    fn test_destroy_follow_up() {
        let config = SessionConfig::new(2, "Duel");
        assert_eq!(
            on_destroy_complete(true, Some(config.clone())),
            DestroyFollowUp::Recreate(config.clone())
        );
        assert_eq!(
            on_destroy_complete(false, Some(config)),
            DestroyFollowUp::AbandonRecreate
        );
        assert_eq!(on_destroy_complete(true, None), DestroyFollowUp::Nothing);
        assert_eq!(on_destroy_complete(false, None), DestroyFollowUp::Nothing);
    }
}
