use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::usage::UsageSnapshot;

/// Metadata portion of a generation submission (the selfie arrives as a
/// multipart file part).
#[derive(Debug, Default, Deserialize, Validate)]
pub struct GenerateRequest {
    /// Historical figure to fuse with. Required for /generate, ignored
    /// for /randomize.
    #[garde(inner(length(min = 1, max = 100)))]
    pub figure: Option<String>,
}

/// Response after a completed fusion.
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub id: Uuid,
    pub figure_name: String,
    pub message: String,
    pub result_url: String,
    pub source_url: String,
    #[serde(default)]
    pub is_randomized: bool,
    pub usage: UsageSnapshot,
}

/// Response for polling a job by id.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
}

/// Error payload shared by all failure responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_required: Option<bool>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: None,
            retry_after: None,
            usage: None,
            registration_required: None,
        }
    }
}
