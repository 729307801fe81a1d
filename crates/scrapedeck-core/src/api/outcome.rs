use serde::Serialize;

use super::ApiError;

/// Uniform result handed to display code: never a raw transport error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Outcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }

    pub fn from_error(err: &ApiError, fallback: &str) -> Self {
        Self::failure(err.user_message(fallback))
    }

    pub fn from_result<T>(result: &Result<T, ApiError>, fallback: &str) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(e) => Self::from_error(e, fallback),
        }
    }

    pub fn message(&self) -> Option<&str> {
        self.error.as_deref()
    }
}
