use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::job::{GenerationJob, JobOwner};

/// Fields needed to create a job record.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub owner: JobOwner,
    pub figure_name: String,
    pub prompt: String,
    pub source_key: String,
    /// How long the artifacts live before the expiry sweep claims them.
    pub retention: Duration,
}

/// Persistence seam for job records. Backed by Postgres in production
/// ([`crate::db::jobs::PgJobStore`]) and by an in-memory store in tests.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record in `pending`.
    async fn create(&self, new: NewJob) -> Result<GenerationJob, JobStoreError>;

    async fn mark_processing(&self, id: Uuid) -> Result<(), JobStoreError>;

    /// Terminal success: set `completed`, `completed_at`, and the result key.
    async fn complete(&self, id: Uuid, result_key: &str) -> Result<(), JobStoreError>;

    /// Terminal failure: set `failed` and the error message. The record is
    /// retained; the expiry sweep reclaims its stored selfie later.
    async fn fail(&self, id: Uuid, error: &str) -> Result<(), JobStoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<GenerationJob>, JobStoreError>;

    /// Records eligible for cleanup: not yet attempted and (unless `force`)
    /// expired before `now`.
    async fn cleanup_batch(
        &self,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<Vec<GenerationJob>, JobStoreError>;

    /// Set `cleanup_attempted` and `is_expired` together, unconditionally.
    /// After this the record is never selected for cleanup again.
    async fn mark_cleanup_attempted(&self, id: Uuid) -> Result<(), JobStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
