//! Authentication module for managing the operator session.
//!
//! This module provides:
//! - `SessionStore`: Session state machine with login, logout and startup resolution
//! - `CredentialStore`: Durable storage for the access token and refresh cookie
//! - `guard`: Route guard decisions and the login redirect hook
//!
//! The access token survives restarts; the identity is re-fetched from the
//! backend every time the session is resolved.

pub mod credentials;
pub mod guard;
pub mod session;
pub(crate) mod state;

pub use credentials::{
    open_store, CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore,
    ACCESS_TOKEN_KEY, SESSION_COOKIE_KEY,
};
pub use guard::{guard, post_login_target, GuardDecision, LogNavigator, Navigator, LOGIN_PATH};
pub use session::{SessionStore, LOGIN_FAILED_MESSAGE};
pub use state::SessionState;
