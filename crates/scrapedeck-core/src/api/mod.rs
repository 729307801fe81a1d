//! REST API access for the scraping service.
//!
//! `AuthenticatedTransport` owns credential attachment and the refresh
//! protocol; `ApiClient` layers the business endpoints (files, scrape jobs,
//! users) on top of it. Failures surface as `ApiError` and are turned into
//! an `Outcome` before reaching display code.

pub mod client;
mod cookies;
pub mod error;
pub mod outcome;
pub mod transport;

pub use client::ApiClient;
pub use error::ApiError;
pub use outcome::Outcome;
pub use transport::{ApiRequest, AuthenticatedTransport};
