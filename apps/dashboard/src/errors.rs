use serde::Deserialize;
use thiserror::Error;

/// Generic message used when a failed response carries no readable body.
pub const GENERIC_FAILURE: &str = "Request failed";

/// Error type shared by the HTTP client, the resource cache and the poller.
///
/// Cloneable so a single failed fetch can be handed to every subscriber of a key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// A required credential or endpoint was not configured. Raised before any request.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("API error (status {status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Decode error: {0}")]
    Decode(String),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    detail: Option<String>,
}

impl ApiError {
    /// Builds the error for a non-2xx response, pulling the message out of the body if possible.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message.or(b.detail))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| GENERIC_FAILURE.to_string());

        if status == 409 {
            ApiError::Conflict { message }
        } else {
            ApiError::Remote { status, message }
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Remote { status, .. } => Some(*status),
            ApiError::Conflict { .. } => Some(409),
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict { .. })
    }

    /// Stable identifier for logs and UI lookups.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Config(_) => "CONFIG_ERROR",
            ApiError::Transport(_) => "TRANSPORT_ERROR",
            ApiError::Remote { status, .. } if *status == 429 => "RATE_LIMITED",
            ApiError::Remote { status, .. } if *status >= 500 => "SERVER_ERROR",
            ApiError::Remote { .. } => "REQUEST_ERROR",
            ApiError::Conflict { .. } => "CONFLICT",
            ApiError::Decode(_) => "DECODE_ERROR",
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode(e.to_string())
    }
}
