//! Route guarding and login redirects.

use tracing::info;

use super::SessionState;

/// The login boundary every unauthenticated flow ends at.
pub const LOGIN_PATH: &str = "/login";

/// Landing page after login when the operator did not come from elsewhere.
pub const DEFAULT_LANDING_PATH: &str = "/admin";

/// Client-side navigation hook. The transport calls this when the session
/// is lost and the operator has to sign in again.
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

/// Navigator for headless use: only records the redirect in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, path: &str) {
        info!(path, "Navigation requested");
    }
}

/// What a protected view should do for the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session still resolving; show a loading indicator.
    Loading,
    /// Send the operator to `to`, remembering where they were headed.
    Redirect { to: &'static str, from: String },
    Render,
}

pub fn guard(state: &SessionState, requested_path: &str) -> GuardDecision {
    match state {
        SessionState::Loading => GuardDecision::Loading,
        SessionState::Anonymous => GuardDecision::Redirect {
            to: LOGIN_PATH,
            from: requested_path.to_string(),
        },
        SessionState::Authenticated(_) => GuardDecision::Render,
    }
}

/// Where to go after a successful login.
pub fn post_login_target(from: Option<&str>) -> &str {
    match from {
        Some(path) if !path.is_empty() && path != LOGIN_PATH => path,
        _ => DEFAULT_LANDING_PATH,
    }
}
