use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{GenerationJob, JobOwner, JobStatus};
use crate::models::usage::{QuotaKind, UsageSnapshot};
use crate::services::capacity::CapacityLimiter;
use crate::services::figures::FigureCatalog;
use crate::services::fusion::{FusionBackend, FusionError};
use crate::services::imaging::{self, ImagingError};
use crate::services::jobs::{JobStore, JobStoreError, NewJob};
use crate::services::quota::{QuotaError, QuotaStore};
use crate::services::retry::{call_with_retry, RetryPolicy};
use crate::services::storage::{resolve_image_url, ObjectStorage, StorageError};

/// Which portrait the selfie gets fused with.
#[derive(Debug, Clone)]
pub enum TransformTarget {
    /// A specific figure from the catalog ("match").
    Figure(String),
    /// A random figure ("randomize").
    Random,
}

impl TransformTarget {
    pub fn quota_kind(&self) -> QuotaKind {
        match self {
            TransformTarget::Figure(_) => QuotaKind::Match,
            TransformTarget::Random => QuotaKind::Randomize,
        }
    }
}

/// A completed generation, ready to be shaped into an API response.
#[derive(Debug)]
pub struct GenerationOutcome {
    pub job: GenerationJob,
    pub source_url: String,
    pub result_url: String,
    pub is_randomized: bool,
    pub usage: UsageSnapshot,
}

/// Caller-visible failure taxonomy for `submit`.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// All fusion slots are taken. Retryable by the caller.
    #[error("server busy, try again in {retry_after} seconds")]
    Busy { retry_after: u64 },

    /// The identity has exhausted its free quota for this kind.
    #[error("usage limit reached for {kind}")]
    QuotaExceeded {
        kind: QuotaKind,
        usage: UsageSnapshot,
    },

    #[error("no historical image available for {0}")]
    UnknownFigure(String),

    #[error("invalid selfie: {0}")]
    InvalidImage(#[from] ImagingError),

    /// The upstream transform failed terminally (after internal retries
    /// for retryable classes). Retry detail stays internal; only an
    /// optional retry hint escapes.
    #[error("face processing failed: {message}")]
    TransformFailed {
        message: String,
        retry_after: Option<u64>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<JobStoreError> for SubmitError {
    fn from(e: JobStoreError) -> Self {
        SubmitError::Internal(e.to_string())
    }
}

impl From<QuotaError> for SubmitError {
    fn from(e: QuotaError) -> Self {
        SubmitError::Internal(e.to_string())
    }
}

impl From<StorageError> for SubmitError {
    fn from(e: StorageError) -> Self {
        SubmitError::Internal(e.to_string())
    }
}

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub retry: RetryPolicy,
    /// Artifact retention before the expiry sweep claims them.
    pub retention: chrono::Duration,
    pub max_concurrent_jobs: usize,
    pub capacity_ttl: Duration,
    /// Hint returned with `Busy` rejections.
    pub busy_retry_after_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            retention: chrono::Duration::hours(48),
            max_concurrent_jobs: 2,
            capacity_ttl: Duration::from_secs(300),
            busy_retry_after_secs: 30,
        }
    }
}

/// Composes quota checking, capacity admission, the retry-wrapped fusion
/// client, and artifact persistence into the end-to-end generate flow.
pub struct JobOrchestrator {
    jobs: Arc<dyn JobStore>,
    quotas: Arc<dyn QuotaStore>,
    storage: Arc<dyn ObjectStorage>,
    fusion: Arc<dyn FusionBackend>,
    catalog: Arc<FigureCatalog>,
    capacity: CapacityLimiter,
    settings: OrchestratorSettings,
}

impl JobOrchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        quotas: Arc<dyn QuotaStore>,
        storage: Arc<dyn ObjectStorage>,
        fusion: Arc<dyn FusionBackend>,
        catalog: Arc<FigureCatalog>,
        settings: OrchestratorSettings,
    ) -> Self {
        let capacity =
            CapacityLimiter::new(settings.max_concurrent_jobs, settings.capacity_ttl);
        Self {
            jobs,
            quotas,
            storage,
            fusion,
            catalog,
            capacity,
            settings,
        }
    }

    pub fn capacity(&self) -> &CapacityLimiter {
        &self.capacity
    }

    /// Run one generation end to end.
    ///
    /// Admission order: capacity first (cheapest), then quota. No record is
    /// created for rejected submissions. The capacity permit is held for
    /// the whole call and released by its `Drop` on every exit path; quota
    /// is checked once and committed at most once, only after success.
    pub async fn submit(
        &self,
        owner: JobOwner,
        selfie: &[u8],
        target: TransformTarget,
    ) -> Result<GenerationOutcome, SubmitError> {
        let Some(_permit) = self.capacity.try_acquire() else {
            metrics::counter!("generation_rejected_busy_total").increment(1);
            return Err(SubmitError::Busy {
                retry_after: self.settings.busy_retry_after_secs,
            });
        };

        let kind = target.quota_kind();
        let decision = self.quotas.check(&owner, kind).await?;
        if !decision.allowed {
            metrics::counter!("generation_rejected_quota_total").increment(1);
            return Err(SubmitError::QuotaExceeded {
                kind,
                usage: decision.usage,
            });
        }

        let (figure_name, portrait_url, is_randomized) = match &target {
            TransformTarget::Figure(name) => {
                let url = self
                    .catalog
                    .portrait_url(name)
                    .ok_or_else(|| SubmitError::UnknownFigure(name.clone()))?;
                (name.clone(), url.to_string(), false)
            }
            TransformTarget::Random => {
                let (name, url) = self.catalog.random();
                (name.to_string(), url.to_string(), true)
            }
        };

        let compressed = imaging::compress_selfie(selfie)?;
        let source_key = format!("uploads/selfies/{}.jpg", Uuid::new_v4());
        self.storage
            .upload(&source_key, &compressed, "image/jpeg")
            .await?;

        let prompt = if is_randomized {
            format!("You as {figure_name} (randomized)")
        } else {
            format!("You as {figure_name}")
        };
        let job = match self
            .jobs
            .create(NewJob {
                owner: owner.clone(),
                figure_name: figure_name.clone(),
                prompt,
                source_key: source_key.clone(),
                retention: self.settings.retention,
            })
            .await
        {
            Ok(job) => job,
            Err(e) => {
                // No record references the uploaded selfie yet, so the
                // expiry sweep would never reclaim it. Remove it now.
                self.discard_source(&source_key).await;
                return Err(e.into());
            }
        };
        self.jobs.mark_processing(job.id).await?;
        metrics::counter!("generation_jobs_total").increment(1);

        tracing::info!(
            job_id = %job.id,
            figure = %figure_name,
            randomized = is_randomized,
            "processing generation job"
        );

        let started = std::time::Instant::now();
        let fused = self
            .run_fusion(&source_key, &portrait_url)
            .await;

        match fused {
            Ok(bytes) => {
                let result_key = format!(
                    "uploads/fused/{}_{}.jpg",
                    job.id,
                    figure_name.replace(' ', "_")
                );
                if let Err(e) = self.storage.upload(&result_key, &bytes, "image/jpeg").await {
                    self.record_failure(job.id, &format!("result upload failed: {e}"))
                        .await;
                    return Err(e.into());
                }
                self.jobs.complete(job.id, &result_key).await?;

                if !owner.is_authenticated() && !self.quotas.commit(&owner, kind).await? {
                    // A concurrent duplicate won the last unit; the work is
                    // done either way and the counter stayed at its cap.
                    tracing::warn!(job_id = %job.id, %kind, "quota commit lost a race");
                }
                let usage = self.quotas.snapshot(&owner).await?;

                metrics::counter!("generation_jobs_completed").increment(1);
                metrics::histogram!("generation_processing_seconds")
                    .record(started.elapsed().as_secs_f64());
                tracing::info!(
                    job_id = %job.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "generation completed"
                );

                let job = self
                    .jobs
                    .get(job.id)
                    .await?
                    .ok_or_else(|| SubmitError::Internal("completed job vanished".into()))?;
                let source_url = resolve_image_url(self.storage.as_ref(), &job.source_key)?;
                let result_url = resolve_image_url(self.storage.as_ref(), &job.result_key)?;
                Ok(GenerationOutcome {
                    job,
                    source_url,
                    result_url,
                    is_randomized,
                    usage,
                })
            }
            Err(e) => {
                self.record_failure(job.id, &e.to_string()).await;
                metrics::counter!("generation_jobs_failed").increment(1);
                tracing::warn!(job_id = %job.id, error = %e, "generation failed");
                Err(map_fusion_error(e))
            }
        }
    }

    async fn run_fusion(
        &self,
        source_key: &str,
        portrait_url: &str,
    ) -> Result<Vec<u8>, FusionError> {
        let source_url = resolve_image_url(self.storage.as_ref(), source_key)
            .map_err(|e| FusionError::Permanent(e.to_string()))?;
        call_with_retry(&self.settings.retry, |_| {
            self.fusion.fuse(&source_url, portrait_url)
        })
        .await
    }

    /// Best-effort removal of a stored selfie no record points at.
    async fn discard_source(&self, source_key: &str) {
        if let Err(e) = self.storage.delete(source_key).await {
            tracing::warn!(key = source_key, error = %e, "could not remove orphaned selfie");
        }
    }

    /// Mark a job failed. The record is retained: polling clients observe
    /// `failed`, and the expiry sweep reclaims the stored selfie later.
    async fn record_failure(&self, id: Uuid, message: &str) {
        if let Err(e) = self.jobs.fail(id, message).await {
            tracing::error!(job_id = %id, error = %e, "could not persist job failure");
        }
    }

    /// Poll view of a job: its record plus a result URL once completed.
    pub async fn status(
        &self,
        id: Uuid,
    ) -> Result<Option<(GenerationJob, Option<String>)>, SubmitError> {
        let Some(job) = self.jobs.get(id).await? else {
            return Ok(None);
        };
        let result_url = if job.status == JobStatus::Completed {
            Some(resolve_image_url(self.storage.as_ref(), &job.result_key)?)
        } else {
            None
        };
        Ok(Some((job, result_url)))
    }

    pub async fn usage(&self, owner: &JobOwner) -> Result<UsageSnapshot, SubmitError> {
        Ok(self.quotas.snapshot(owner).await?)
    }
}

fn map_fusion_error(e: FusionError) -> SubmitError {
    match e {
        FusionError::RateLimitExhausted { .. } | FusionError::RateLimited(_) => {
            SubmitError::TransformFailed {
                message: "the fusion service is under heavy load".to_string(),
                retry_after: Some(30),
            }
        }
        FusionError::Transient(_) => SubmitError::TransformFailed {
            message: "the fusion service is temporarily unavailable".to_string(),
            retry_after: Some(10),
        },
        FusionError::Permanent(message) => SubmitError::TransformFailed {
            message,
            retry_after: None,
        },
    }
}
