use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::ApiError;

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct ContactMessage {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct Submission<'a> {
    access_key: &'a str,
    #[serde(flatten)]
    message: &'a ContactMessage,
}

#[derive(Debug, Deserialize)]
struct SubmissionResponse {
    success: bool,
    message: Option<String>,
}

/// Posts marketing-site contact messages to the Web3Forms endpoint.
#[derive(Clone)]
pub struct ContactClient {
    client: Client,
    url: String,
    access_key: Option<String>,
}

impl ContactClient {
    pub fn new(url: impl Into<String>, access_key: Option<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(SUBMIT_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            access_key,
        })
    }

    fn access_key(&self) -> Result<&str, ApiError> {
        self.access_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ApiError::Config("missing form configuration".to_string()))
    }

    pub async fn submit(&self, message: &ContactMessage) -> Result<(), ApiError> {
        // No request is built without a key.
        let access_key = self.access_key()?;

        let response = self
            .client
            .post(&self.url)
            .json(&Submission {
                access_key,
                message,
            })
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        let parsed: SubmissionResponse = serde_json::from_str(&body).map_err(|_| {
            ApiError::from_response(if status < 400 { 502 } else { status }, &body)
        })?;

        if parsed.success {
            info!("Contact form submitted for {}", message.email);
            Ok(())
        } else {
            warn!("Contact form rejected: {:?}", parsed.message);
            Err(ApiError::Remote {
                status,
                message: parsed
                    .message
                    .unwrap_or_else(|| "Error sending message".to_string()),
            })
        }
    }
}
