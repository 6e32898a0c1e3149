use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::poller::TrackedStatus;

/// Processing state of an uploaded resume as reported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploading,
    Parsing,
    Validating,
    Processing,
    Extracting,
    Completed,
    Failed,
    Invalid,
    #[serde(other)]
    Unknown,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploading => "uploading",
            DocumentStatus::Parsing => "parsing",
            DocumentStatus::Validating => "validating",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Extracting => "extracting",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Invalid => "invalid",
            DocumentStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TrackedStatus for DocumentStatus {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Completed | DocumentStatus::Failed | DocumentStatus::Invalid
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentListItem {
    pub id: Uuid,
    pub original_filename: String,
    pub file_type: String,
    pub document_type: Option<String>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
}

impl DocumentListItem {
    /// List entry shown for a fresh upload until the next list fetch replaces it.
    pub fn from_upload(upload: &UploadResponse, filename: &str, now: DateTime<Utc>) -> Self {
        let file_type = filename
            .rsplit('.')
            .next()
            .filter(|ext| !ext.is_empty())
            .unwrap_or("unknown");
        Self {
            id: upload.document_id,
            original_filename: filename.to_string(),
            file_type: file_type.to_string(),
            document_type: None,
            status: upload.status,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStatusResponse {
    pub status: DocumentStatus,
    pub progress_message: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub document_id: Uuid,
    pub status: DocumentStatus,
}

/// Query for one page of the document list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFilters {
    pub status_filter: Option<DocumentStatus>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for DocumentFilters {
    fn default() -> Self {
        Self {
            status_filter: None,
            limit: 20,
            offset: 0,
        }
    }
}

impl DocumentFilters {
    /// Cache key and request path for this page.
    pub fn to_path(&self) -> String {
        let mut path = format!("/documents?limit={}&offset={}", self.limit, self.offset);
        if let Some(status) = self.status_filter {
            path.push_str(&format!("&status_filter={status}"));
        }
        path
    }

    pub fn first_page(&self) -> Self {
        Self {
            offset: 0,
            ..self.clone()
        }
    }

    /// A page this full may be followed by another.
    pub fn is_full_page(&self, len: usize) -> bool {
        len as u64 == u64::from(self.limit)
    }

    pub fn next_page(&self) -> Self {
        Self {
            offset: self.offset + self.limit,
            ..self.clone()
        }
    }
}
