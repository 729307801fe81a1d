use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized - token may be expired: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Request failed with status {status}: {body}")]
    ClientError { status: u16, body: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The backend answered with `{"success": false}`.
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Session refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Credential storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    Validation(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Error payload shape used by every backend endpoint.
#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized(truncated),
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            code => ApiError::ClientError {
                status: code,
                body: truncated,
            },
        }
    }

    pub(crate) fn storage(err: anyhow::Error) -> Self {
        ApiError::Storage(format!("{:#}", err))
    }

    /// 401 and 403 both mean the credential was not accepted.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_) | ApiError::AccessDenied(_))
    }

    /// The `error` field of the backend payload, if the failure carried one.
    pub fn backend_message(&self) -> Option<String> {
        let body = match self {
            ApiError::Unauthorized(body)
            | ApiError::AccessDenied(body)
            | ApiError::NotFound(body)
            | ApiError::ServerError(body)
            | ApiError::ClientError { body, .. } => body,
            ApiError::Rejected(message) => return Some(message.clone()),
            _ => return None,
        };
        serde_json::from_str::<ErrorPayload>(body)
            .ok()
            .and_then(|p| p.error)
            .filter(|m| !m.trim().is_empty())
    }

    /// Message safe to show an operator. Falls back to `fallback` when the
    /// failure carries nothing more specific.
    pub fn user_message(&self, fallback: &str) -> String {
        if let Some(message) = self.backend_message() {
            return message;
        }
        match self {
            ApiError::Validation(message) => message.clone(),
            ApiError::NetworkError(e) if e.is_timeout() => {
                "Connection timed out. Please try again.".to_string()
            }
            ApiError::NetworkError(_) => {
                "Unable to connect to server. Check your connection.".to_string()
            }
            ApiError::RefreshFailed(_) => "Session expired. Please log in again.".to_string(),
            ApiError::RateLimited => self.to_string(),
            _ => fallback.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_classification() {
        assert!(matches!(ApiError::from_status(StatusCode::UNAUTHORIZED, ""), ApiError::Unauthorized(_)));
        assert!(matches!(ApiError::from_status(StatusCode::FORBIDDEN, ""), ApiError::AccessDenied(_)));
        assert!(matches!(ApiError::from_status(StatusCode::NOT_FOUND, ""), ApiError::NotFound(_)));
        assert!(matches!(ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""), ApiError::RateLimited));
        assert!(matches!(ApiError::from_status(StatusCode::BAD_GATEWAY, ""), ApiError::ServerError(_)));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_REQUEST, ""),
            ApiError::ClientError { status: 400, .. }
        ));
    }

    #[test]
    fn test_auth_failure_covers_401_and_403() {
        assert!(ApiError::from_status(StatusCode::UNAUTHORIZED, "").is_auth_failure());
        assert!(ApiError::from_status(StatusCode::FORBIDDEN, "").is_auth_failure());
        assert!(!ApiError::from_status(StatusCode::NOT_FOUND, "").is_auth_failure());
    }

    #[test]
    fn test_backend_message_extracted() {
        let err = ApiError::from_status(StatusCode::UNAUTHORIZED, r#"{"error":"Invalid credentials"}"#);
        assert_eq!(err.backend_message().as_deref(), Some("Invalid credentials"));
        assert_eq!(err.user_message("Login failed"), "Invalid credentials");
    }

    #[test]
    fn test_user_message_falls_back() {
        let err = ApiError::from_status(StatusCode::BAD_REQUEST, "<html>oops</html>");
        assert_eq!(err.backend_message(), None);
        assert_eq!(err.user_message("Login failed"), "Login failed");

        let err = ApiError::from_status(StatusCode::BAD_REQUEST, r#"{"error":""}"#);
        assert_eq!(err.user_message("Login failed"), "Login failed");
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let body = "é".repeat(MAX_ERROR_BODY_LENGTH);
        let truncated = ApiError::truncate_body(&body);
        assert!(truncated.contains("truncated"));
    }
}
