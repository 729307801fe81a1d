//! Scrapedeck core - client library for the scraping service admin console.
//!
//! The pieces that matter:
//! - [`auth::SessionStore`] holds the operator session and is the single
//!   source of truth for route guards.
//! - [`api::AuthenticatedTransport`] wraps every backend call, attaching the
//!   access token and transparently refreshing it once on 401/403.
//! - [`api::ApiClient`] exposes the file, scrape and user endpoints.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod utils;

use std::sync::Arc;

use anyhow::Result;

pub use api::{ApiClient, ApiError, AuthenticatedTransport, Outcome};
pub use auth::{CredentialStore, Navigator, SessionState, SessionStore};
pub use config::Config;

/// Everything a console needs, wired against one base URL and one
/// credential store.
pub struct Console {
    pub session: SessionStore,
    pub api: ApiClient,
}

impl Console {
    pub fn new(
        config: &Config,
        credentials: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let transport = AuthenticatedTransport::new(config, credentials, navigator)?;
        Ok(Self {
            api: ApiClient::new(transport.clone()),
            session: SessionStore::new(transport),
        })
    }

    /// Build with the credential backend named in the config.
    pub fn from_config(config: &Config, navigator: Arc<dyn Navigator>) -> Result<Self> {
        let credentials = auth::open_store(config)?;
        Self::new(config, credentials, navigator)
    }
}
