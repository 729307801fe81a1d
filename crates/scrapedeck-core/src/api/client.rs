//! API client for the scraping service's business endpoints.
//!
//! This module provides the `ApiClient` struct for listing and deleting
//! scrape artifacts, submitting scrape jobs and managing console users. All
//! calls go through the shared `AuthenticatedTransport`.

use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::models::{
    FileEntry, Identity, Role, ScrapeInfo, ScrapeRequest, ScrapedDocument, UserUpdate,
    YoutubeScrapeRequest,
};

use super::{ApiError, ApiRequest, AuthenticatedTransport};

#[derive(Debug, Deserialize)]
struct FilesResponse {
    #[serde(default)]
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct FileResponse {
    data: ScrapedDocument,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    info: ScrapeInfo,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    #[serde(default)]
    users: Vec<Identity>,
}

/// Clone is cheap - the transport is reference counted.
#[derive(Clone)]
pub struct ApiClient {
    transport: AuthenticatedTransport,
}

impl ApiClient {
    pub fn new(transport: AuthenticatedTransport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &AuthenticatedTransport {
        &self.transport
    }

    /// Send and unwrap the `{success, ...}` envelope every endpoint uses.
    async fn call<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let value: Value = self.transport.send_json(&request).await?;
        Self::unwrap_envelope(value, &request)
    }

    fn unwrap_envelope<T: DeserializeOwned>(value: Value, request: &ApiRequest) -> Result<T, ApiError> {
        let success = value.get("success").and_then(Value::as_bool).unwrap_or(false);
        if !success {
            let message = value
                .get("error")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .unwrap_or("Request was not successful");
            return Err(ApiError::Rejected(message.to_string()));
        }
        serde_json::from_value(value).map_err(|e| {
            ApiError::InvalidResponse(format!("Unexpected response shape from {}: {}", request.path(), e))
        })
    }

    fn file_name(name: &str) -> Result<&str, ApiError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::Validation("File name is required".to_string()));
        }
        Ok(name)
    }

    // ===== Files =====

    /// List stored scrape artifacts
    pub async fn list_files(&self) -> Result<Vec<FileEntry>, ApiError> {
        let response: FilesResponse = self.call(ApiRequest::get(["files"])).await?;
        debug!(count = response.files.len(), "Fetched file list");
        Ok(response.files)
    }

    /// Fetch the contents of one artifact
    pub async fn get_file(&self, name: &str) -> Result<ScrapedDocument, ApiError> {
        let name = Self::file_name(name)?;
        let response: FileResponse = self.call(ApiRequest::get(["files", name])).await?;
        Ok(response.data)
    }

    pub async fn delete_file(&self, name: &str) -> Result<(), ApiError> {
        let name = Self::file_name(name)?;
        let _: IgnoredAny = self.call(ApiRequest::delete(["files", name])).await?;
        info!(file = name, "Deleted file");
        Ok(())
    }

    // ===== Scrape jobs =====

    /// Submit a page scrape. Returns the name of the file the result was saved to.
    pub async fn submit_scrape(&self, request: ScrapeRequest) -> Result<String, ApiError> {
        let request = request.validated()?;
        let response: ScrapeResponse = self
            .call(ApiRequest::post(["scrape"]).json(&request)?)
            .await?;
        info!(url = %request.url, file = %response.info.saved_to_file, "Scrape completed");
        Ok(response.info.saved_to_file)
    }

    /// Submit a YouTube comment scrape. Returns the saved file name.
    pub async fn submit_youtube_scrape(&self, request: YoutubeScrapeRequest) -> Result<String, ApiError> {
        let request = request.validated()?;
        let response: ScrapeResponse = self
            .call(ApiRequest::post(["scrape", "youtube"]).json(&request)?)
            .await?;
        info!(url = %request.url, file = %response.info.saved_to_file, "YouTube scrape completed");
        Ok(response.info.saved_to_file)
    }

    // ===== Users =====

    pub async fn list_users(&self) -> Result<Vec<Identity>, ApiError> {
        let response: UsersResponse = self.call(ApiRequest::get(["users"])).await?;
        Ok(response.users)
    }

    pub async fn delete_user(&self, id: i64) -> Result<(), ApiError> {
        let _: IgnoredAny = self
            .call(ApiRequest::delete(["users".to_string(), id.to_string()]))
            .await?;
        info!(user_id = id, "Deleted user");
        Ok(())
    }

    pub async fn set_user_role(&self, id: i64, role: Role) -> Result<(), ApiError> {
        let body = serde_json::json!({ "role": role });
        let _: IgnoredAny = self
            .call(ApiRequest::put(["users".to_string(), id.to_string(), "role".to_string()]).json(&body)?)
            .await?;
        info!(user_id = id, %role, "Updated user role");
        Ok(())
    }

    pub async fn update_user(&self, id: i64, update: &UserUpdate) -> Result<(), ApiError> {
        if update.username.trim().is_empty() {
            return Err(ApiError::Validation("Username is required".to_string()));
        }
        let _: IgnoredAny = self
            .call(ApiRequest::put(["users".to_string(), id.to_string()]).json(update)?)
            .await?;
        info!(user_id = id, "Updated user");
        Ok(())
    }
}
