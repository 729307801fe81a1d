use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::models::Identity;

/// Where the session currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Startup; the stored credential has not been checked yet.
    Loading,
    Authenticated(Identity),
    Anonymous,
}

impl SessionState {
    pub fn is_loading(&self) -> bool {
        matches!(self, SessionState::Loading)
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionState::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            SessionState::Loading => "loading",
            SessionState::Authenticated(_) => "authenticated",
            SessionState::Anonymous => "anonymous",
        }
    }

    /// Whether `self -> next` is an edge of the session state machine.
    ///
    /// `Anonymous -> Anonymous` is accepted as a no-op so teardown paths
    /// can run unconditionally.
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Loading, Authenticated(_))
                | (Loading, Anonymous)
                | (Authenticated(_), Anonymous)
                | (Anonymous, Authenticated(_))
                | (Anonymous, Anonymous)
        )
    }
}

/// Shared, observable session state.
///
/// Owned jointly by the session store and the transport, which needs to end
/// the session when a refresh fails.
#[derive(Clone)]
pub(crate) struct SessionCell {
    tx: Arc<watch::Sender<SessionState>>,
}

impl SessionCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Loading);
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn current(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub(crate) fn is_anonymous(&self) -> bool {
        matches!(*self.tx.borrow(), SessionState::Anonymous)
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Apply `next` if the state machine allows it. Returns whether the
    /// state is now `next`.
    pub(crate) fn transition(&self, next: SessionState) -> bool {
        let mut accepted = false;
        self.tx.send_if_modified(|state| {
            if !state.can_transition_to(&next) {
                warn!(from = state.tag(), to = next.tag(), "Refusing illegal session transition");
                return false;
            }
            accepted = true;
            if *state == next {
                return false;
            }
            info!(from = state.tag(), to = next.tag(), "Session state changed");
            *state = next;
            true
        });
        accepted
    }
}
