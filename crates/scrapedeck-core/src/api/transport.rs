//! Credential-aware HTTP transport.
//!
//! Every backend call goes through `AuthenticatedTransport`. It attaches the
//! stored bearer token at send time, and when the backend rejects the token
//! (401/403) it refreshes the session once using the refresh cookie and
//! replays the request. Concurrent refreshes are coalesced: the first
//! rejected request starts the refresh, later ones await the same outcome.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use anyhow::Context;
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::cookie::CookieStore;
use reqwest::{Client, Method, Response, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::credentials::{CredentialStore, SESSION_COOKIE_KEY};
use crate::auth::guard::{Navigator, LOGIN_PATH};
use crate::auth::state::SessionCell;
use crate::auth::SessionState;
use crate::config::Config;

use super::cookies::SessionCookies;
use super::ApiError;

const REFRESH_PATH: [&str; 2] = ["auth", "refresh-token"];

/// Upper bound on a single rate-limit backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Result of one shared refresh: the new access token.
type RefreshOutcome = Result<String, Arc<ApiError>>;
type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// An outbound call, described independently of any one send.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    segments: Vec<String>,
    body: Option<Value>,
}

impl ApiRequest {
    pub fn new<I, S>(method: Method, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            body: None,
        }
    }

    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::GET, segments)
    }

    pub fn post<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::POST, segments)
    }

    pub fn put<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::PUT, segments)
    }

    pub fn delete<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::DELETE, segments)
    }

    /// Attach a JSON body.
    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::Validation(format!("Failed to encode request body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Retry,
}

/// A request paired with how many times it has been sent after an auth
/// failure. Only a `First` attempt may become a `Retry`.
#[derive(Debug, Clone, Copy)]
struct AttemptedRequest<'a> {
    request: &'a ApiRequest,
    attempt: Attempt,
}

impl<'a> AttemptedRequest<'a> {
    fn first(request: &'a ApiRequest) -> Self {
        Self {
            request,
            attempt: Attempt::First,
        }
    }

    fn into_retry(self) -> Option<Self> {
        match self.attempt {
            Attempt::First => Some(Self {
                request: self.request,
                attempt: Attempt::Retry,
            }),
            Attempt::Retry => None,
        }
    }
}

/// How a refresh run ended.
enum RefreshResult {
    Refreshed(String),
    /// The session ended while the refresh was in flight; the new token was
    /// not kept.
    Discarded,
    Failed(ApiError),
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
}

struct Inner {
    client: Client,
    jar: Arc<SessionCookies>,
    base_url: Url,
    credentials: Arc<dyn CredentialStore>,
    navigator: Arc<dyn Navigator>,
    session: SessionCell,
    refresh: std::sync::Mutex<Option<PendingRefresh>>,
    rate_limit_retries: u32,
    initial_backoff: Duration,
}

/// Clone is cheap: all clones share the connection pool, cookie jar and
/// refresh slot.
#[derive(Clone)]
pub struct AuthenticatedTransport {
    inner: Arc<Inner>,
}

impl AuthenticatedTransport {
    pub fn new(
        config: &Config,
        credentials: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> anyhow::Result<Self> {
        let base_url = config.base_url()?;
        let jar = Arc::new(SessionCookies::default());
        let client = Client::builder()
            .timeout(config.timeout())
            .cookie_provider(jar.clone())
            .build()
            .context("Failed to build HTTP client")?;

        let transport = Self {
            inner: Arc::new(Inner {
                client,
                jar,
                base_url,
                credentials,
                navigator,
                session: SessionCell::new(),
                refresh: std::sync::Mutex::new(None),
                rate_limit_retries: config.rate_limit_retries,
                initial_backoff: config.initial_backoff(),
            }),
        };
        transport.restore_session_cookie()?;
        Ok(transport)
    }

    pub(crate) fn session(&self) -> &SessionCell {
        &self.inner.session
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// The stored credential, read fresh from the store.
    pub fn access_token(&self) -> Result<Option<String>, ApiError> {
        self.inner.credentials.access_token().map_err(ApiError::storage)
    }

    pub(crate) fn store_access_token(&self, token: &str) -> Result<(), ApiError> {
        self.inner
            .credentials
            .set_access_token(token)
            .map_err(ApiError::storage)?;
        self.persist_session_cookie();
        Ok(())
    }

    /// Drop the access token and the refresh cookie, both persisted and
    /// in memory.
    pub(crate) fn clear_credentials(&self) -> Result<(), ApiError> {
        self.inner.jar.clear();
        self.inner.credentials.clear_session().map_err(ApiError::storage)
    }

    /// Resolve path segments against the configured base.
    pub fn endpoint<I, S>(&self, segments: I) -> Result<Url, ApiError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Validation("API base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send with the stored credential and the single-retry refresh protocol.
    pub async fn send(&self, request: &ApiRequest) -> Result<Response, ApiError> {
        let mut attempted = AttemptedRequest::first(request);
        loop {
            let token = self.access_token()?;
            match self.dispatch(attempted, token.as_deref()).await {
                Err(err) if err.is_auth_failure() => {
                    let Some(retry) = attempted.into_retry() else {
                        debug!(path = %request.path(), "Retried request rejected again, giving up");
                        return Err(err);
                    };
                    if !self.recover_credential(token.as_deref()).await? {
                        debug!(path = %request.path(), "No session to refresh");
                        return Err(err);
                    }
                    attempted = retry;
                }
                other => return other,
            }
        }
    }

    /// `send`, then decode the JSON body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        Self::decode(response, request).await
    }

    /// Send without a bearer token and without the refresh protocol. Used
    /// for login, where there is no prior credential to refresh.
    pub async fn send_anonymous(&self, request: &ApiRequest) -> Result<Response, ApiError> {
        let url = self.endpoint(&request.segments)?;
        let mut builder = self.inner.client.request(request.method.clone(), url);
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        debug!(method = %request.method, path = %request.path(), "Sending anonymous request");
        let response = builder.send().await?;
        Self::check_response(response).await
    }

    pub(crate) async fn decode<T: DeserializeOwned>(
        response: Response,
        request: &ApiRequest,
    ) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", request.path(), e))
        })
    }

    async fn dispatch(
        &self,
        attempted: AttemptedRequest<'_>,
        token: Option<&str>,
    ) -> Result<Response, ApiError> {
        let request = attempted.request;
        let url = self.endpoint(&request.segments)?;
        let mut retries = 0;
        let mut backoff = self.inner.initial_backoff;

        loop {
            let mut builder = self.inner.client.request(request.method.clone(), url.clone());
            if let Some(token) = token {
                builder = builder.bearer_auth(token);
            }
            if let Some(ref body) = request.body {
                builder = builder.json(body);
            }
            debug!(
                method = %request.method,
                path = %request.path(),
                attempt = ?attempted.attempt,
                "Sending request"
            );
            let response = builder.send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > self.inner.rate_limit_retries {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(
                        path = %request.path(),
                        retry = retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                }
            }
        }
    }

    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit
    /// (should retry), or Err for other errors.
    async fn check_response_for_retry(response: Response) -> Result<Option<Response>, ApiError> {
        if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            Self::check_response(response).await.map(Some)
        }
    }

    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Make a fresh credential available after `sent_with` was rejected.
    /// Returns `Ok(false)` when the session is anonymous and there is nothing
    /// to refresh; the caller then surfaces the original rejection.
    ///
    /// Joins the in-flight refresh if there is one. Otherwise, if the stored
    /// token already differs from the rejected one, another task refreshed in
    /// the meantime and the caller can retry straight away.
    async fn recover_credential(&self, sent_with: Option<&str>) -> Result<bool, ApiError> {
        let pending = {
            let mut slot = self.inner.refresh.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(pending) => {
                    debug!("Joining in-flight session refresh");
                    pending.clone()
                }
                None => {
                    // Only login leaves the anonymous state.
                    if self.inner.session.is_anonymous() {
                        return Ok(false);
                    }
                    let current = self.access_token()?;
                    if current.is_some() && current.as_deref() != sent_with {
                        debug!("Credential replaced since request was sent, retrying without refresh");
                        return Ok(true);
                    }
                    let pending = self.start_refresh();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        pending.await.map(|_| true).map_err(|e| match &*e {
            ApiError::RefreshFailed(message) => ApiError::RefreshFailed(message.clone()),
            other => ApiError::RefreshFailed(other.to_string()),
        })
    }

    /// Spawn the refresh so it completes even if every waiter goes away.
    fn start_refresh(&self) -> PendingRefresh {
        let transport = self.clone();
        let handle = tokio::spawn(async move { transport.run_refresh().await });
        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(Arc::new(ApiError::RefreshFailed(format!("refresh task aborted: {}", e)))),
            }
        }
        .boxed()
        .shared()
    }

    async fn run_refresh(self) -> RefreshOutcome {
        info!("Access token rejected, refreshing session");
        let result = match self.call_refresh_endpoint().await {
            Ok(_) if self.inner.session.is_anonymous() => RefreshResult::Discarded,
            Ok(token) => match self.store_access_token(&token) {
                // Logout landed between the check and the store.
                Ok(()) if self.inner.session.is_anonymous() => {
                    if let Err(e) = self.clear_credentials() {
                        warn!(error = %e, "Failed to clear stored credentials");
                    }
                    RefreshResult::Discarded
                }
                Ok(()) => RefreshResult::Refreshed(token),
                Err(e) => RefreshResult::Failed(e),
            },
            Err(e) => RefreshResult::Failed(e),
        };

        match result {
            RefreshResult::Refreshed(_) => info!("Session refreshed"),
            RefreshResult::Discarded => info!("Session ended during refresh, discarding new token"),
            RefreshResult::Failed(ref e) => {
                warn!(error = %e, "Session refresh failed, ending session");
                if let Err(clear_err) = self.clear_credentials() {
                    warn!(error = %clear_err, "Failed to clear stored credentials");
                }
                self.inner.session.transition(SessionState::Anonymous);
            }
        }

        // Release the slot only after the store reflects the outcome, so a
        // late arrival either joins this refresh or sees its result.
        self.inner
            .refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match result {
            RefreshResult::Refreshed(token) => Ok(token),
            RefreshResult::Discarded => Err(Arc::new(ApiError::RefreshFailed(
                "session ended while refreshing".to_string(),
            ))),
            RefreshResult::Failed(e) => {
                self.inner.navigator.navigate(LOGIN_PATH);
                Err(Arc::new(e))
            }
        }
    }

    /// POST the refresh endpoint with only the cookie jar for credentials.
    async fn call_refresh_endpoint(&self) -> Result<String, ApiError> {
        let url = self.endpoint(REFRESH_PATH)?;
        let response = self
            .inner
            .client
            .post(url)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        let text = response.text().await?;
        let parsed: RefreshResponse = serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse refresh response: {}", e)))?;

        match parsed.access_token {
            Some(token) if parsed.success && !token.is_empty() => Ok(token),
            _ => Err(ApiError::RefreshFailed(
                "refresh endpoint did not return a new access token".to_string(),
            )),
        }
    }

    /// Save the refresh cookie so the next process can still refresh.
    fn persist_session_cookie(&self) {
        let Ok(url) = self.endpoint(REFRESH_PATH) else {
            return;
        };
        let Some(value) = self.inner.jar.cookies(&url) else {
            return;
        };
        match value.to_str() {
            Ok(cookies) => {
                if let Err(e) = self.inner.credentials.set(SESSION_COOKIE_KEY, cookies) {
                    warn!(error = %e, "Failed to persist session cookie");
                }
            }
            Err(_) => warn!("Session cookie is not valid UTF-8, not persisting"),
        }
    }

    fn restore_session_cookie(&self) -> anyhow::Result<()> {
        let Some(stored) = self.inner.credentials.get(SESSION_COOKIE_KEY)? else {
            return Ok(());
        };
        let url = self.endpoint(REFRESH_PATH)?;
        let scope = self.inner.base_url.path().trim_end_matches('/');
        let scope = if scope.is_empty() { "/" } else { scope };
        for pair in stored.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            self.inner
                .jar
                .add_cookie_str(&format!("{}; Path={}", pair, scope), &url);
        }
        debug!("Restored session cookie");
        Ok(())
    }
}

fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).min(MAX_BACKOFF)
}
