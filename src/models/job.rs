use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of a face fusion job.
///
/// `Completed` and `Failed` are terminal; no transition leaves them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Who a job belongs to: an authenticated user or an anonymous session.
/// Exactly one of the two, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOwner {
    User(String),
    Session(String),
}

impl JobOwner {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            JobOwner::User(id) => Some(id),
            JobOwner::Session(_) => None,
        }
    }

    pub fn session_key(&self) -> Option<&str> {
        match self {
            JobOwner::User(_) => None,
            JobOwner::Session(key) => Some(key),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, JobOwner::User(_))
    }
}

/// A face fusion job and its artifact lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: Uuid,
    #[serde(skip)]
    pub user_id: Option<String>,
    #[serde(skip)]
    pub session_key: Option<String>,
    pub figure_name: String,
    pub prompt: String,
    /// Storage key of the uploaded selfie.
    pub source_key: String,
    /// Storage key of the fused result; empty until the job completes.
    pub result_key: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub is_expired: bool,
    /// Once true, the expiry sweep never looks at this record again.
    pub cleanup_attempted: bool,
}
