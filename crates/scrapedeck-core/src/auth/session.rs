use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::api::{ApiError, ApiRequest, AuthenticatedTransport, Outcome};
use crate::models::Identity;

use super::state::SessionCell;
use super::SessionState;

/// Shown when the backend rejects a login without saying why.
pub const LOGIN_FAILED_MESSAGE: &str = "Login failed";

const MISSING_FIELDS_MESSAGE: &str = "Username and password required";

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
    user: Option<Identity>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    #[serde(default)]
    success: bool,
    user: Option<Identity>,
}

/// Owner of the session: identity, credential lifecycle and the
/// `Loading -> {Authenticated, Anonymous}` state machine.
///
/// Create one per application, call `resolve_session` at boot and hand
/// clones of `subscribe()` to whatever guards protected views.
pub struct SessionStore {
    transport: AuthenticatedTransport,
    state: SessionCell,
    /// Held for the whole of `resolve_session` so concurrent callers wait
    /// for the first resolution instead of repeating it.
    resolving: Mutex<()>,
}

/// Settles a still-loading session as anonymous if resolution is abandoned
/// before it finishes.
struct LoadingRelease<'a> {
    state: &'a SessionCell,
}

impl Drop for LoadingRelease<'_> {
    fn drop(&mut self) {
        if self.state.current().is_loading() {
            self.state.transition(SessionState::Anonymous);
        }
    }
}

impl SessionStore {
    pub fn new(transport: AuthenticatedTransport) -> Self {
        let state = transport.session().clone();
        Self {
            transport,
            state,
            resolving: Mutex::new(()),
        }
    }

    pub fn transport(&self) -> &AuthenticatedTransport {
        &self.transport
    }

    pub fn state(&self) -> SessionState {
        self.state.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state().identity().cloned()
    }

    /// Check the stored credential against `/auth/me`. Runs once at startup;
    /// later and concurrent calls return the settled state.
    pub async fn resolve_session(&self) -> SessionState {
        let _resolving = self.resolving.lock().await;
        if !self.state.current().is_loading() {
            debug!("Session already resolved");
            return self.state();
        }
        let _release = LoadingRelease { state: &self.state };

        let next = match self.resolve_identity().await {
            Ok(Some(identity)) => {
                info!(user_id = identity.id, role = %identity.role, "Session resolved");
                SessionState::Authenticated(identity)
            }
            Ok(None) => {
                debug!("No stored credential");
                SessionState::Anonymous
            }
            Err(e) => {
                info!(error = %e, "Not authenticated");
                if let Err(clear_err) = self.transport.clear_credentials() {
                    warn!(error = %clear_err, "Failed to discard stored credential");
                }
                SessionState::Anonymous
            }
        };
        self.state.transition(next);
        self.state()
    }

    async fn resolve_identity(&self) -> Result<Option<Identity>, ApiError> {
        if self.transport.access_token()?.is_none() {
            return Ok(None);
        }
        let response: MeResponse = self.transport.send_json(&ApiRequest::get(["auth", "me"])).await?;
        match response.user {
            Some(user) if response.success => Ok(Some(user)),
            _ => Err(ApiError::Rejected("identity could not be resolved".to_string())),
        }
    }

    /// Sign in. Goes straight to the login endpoint, without a bearer token
    /// or the refresh protocol.
    pub async fn login(&self, username: &str, password: &str) -> Outcome {
        if username.trim().is_empty() || password.is_empty() {
            return Outcome::failure(MISSING_FIELDS_MESSAGE);
        }
        if let SessionState::Authenticated(current) = self.state() {
            return Outcome::failure(format!(
                "Already signed in as {}; log out first",
                current.username
            ));
        }

        match self.try_login(username.trim(), password).await {
            Ok(identity) => {
                info!(user_id = identity.id, role = %identity.role, "Login successful");
                if self.state.transition(SessionState::Authenticated(identity)) {
                    Outcome::ok()
                } else {
                    Outcome::failure(LOGIN_FAILED_MESSAGE)
                }
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                Outcome::from_error(&e, LOGIN_FAILED_MESSAGE)
            }
        }
    }

    async fn try_login(&self, username: &str, password: &str) -> Result<Identity, ApiError> {
        let request = ApiRequest::post(["auth", "login"]).json(&LoginRequest { username, password })?;
        let response = self.transport.send_anonymous(&request).await?;
        let response: LoginResponse = AuthenticatedTransport::decode(response, &request).await?;

        if !response.success {
            return Err(ApiError::Rejected(
                response.error.unwrap_or_else(|| LOGIN_FAILED_MESSAGE.to_string()),
            ));
        }
        match (response.access_token, response.user) {
            (Some(token), Some(user)) if !token.is_empty() => {
                self.transport.store_access_token(&token)?;
                Ok(user)
            }
            _ => Err(ApiError::InvalidResponse(
                "login response is missing the access token or user".to_string(),
            )),
        }
    }

    /// Sign out. The backend call is best effort; local teardown always happens.
    pub async fn logout(&self) {
        match self.transport.access_token() {
            Ok(Some(_)) => {
                if let Err(e) = self.transport.send(&ApiRequest::post(["auth", "logout"])).await {
                    warn!(error = %e, "Logout request failed, clearing local session anyway");
                }
            }
            Ok(None) => debug!("No stored credential, skipping logout request"),
            Err(e) => warn!(error = %e, "Could not read stored credential"),
        }

        // Anonymous first, so a refresh finishing now discards its token.
        self.state.transition(SessionState::Anonymous);
        if let Err(e) = self.transport.clear_credentials() {
            warn!(error = %e, "Failed to clear stored credentials");
        }
        info!("Logged out");
    }
}
