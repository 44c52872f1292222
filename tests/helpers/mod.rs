//! In-memory stand-ins for the orchestrator's collaborators.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use facefuse::models::job::{GenerationJob, JobOwner, JobStatus};
use facefuse::models::usage::{QuotaKind, UsageQuota, UsageSnapshot};
use facefuse::services::fusion::{FusionBackend, FusionError};
use facefuse::services::jobs::{JobStore, JobStoreError, NewJob};
use facefuse::services::quota::{QuotaDecision, QuotaError, QuotaStore};
use facefuse::services::storage::{ObjectStorage, StorageError};

/// A small valid PNG to use as an uploaded selfie.
pub fn sample_selfie() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        64,
        64,
        image::Rgb([120, 90, 70]),
    ));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

// ── Storage ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStorage {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    /// Keys whose deletion should fail, for failure-isolation tests.
    pub failing_deletes: Mutex<HashSet<String>>,
}

impl MemoryStorage {
    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn fail_delete_of(&self, key: &str) {
        self.failing_deletes.lock().unwrap().insert(key.to_string());
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload(&self, key: &str, data: &[u8], _content_type: &str) -> Result<(), StorageError> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        if self.failing_deletes.lock().unwrap().contains(key) {
            return Err(StorageError::Config("injected delete failure".into()));
        }
        // Deleting a missing key is fine, matching the real client.
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    fn url_of(&self, key: &str) -> String {
        format!("https://media.test/{key}")
    }
}

// ── Job store ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryJobStore {
    pub jobs: Mutex<HashMap<Uuid, GenerationJob>>,
}

impl MemoryJobStore {
    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn get_sync(&self, id: Uuid) -> Option<GenerationJob> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<GenerationJob> {
        self.jobs.lock().unwrap().values().cloned().collect()
    }

    /// Insert a record directly, controlling its expiry; for sweep tests.
    pub fn seed(&self, source_key: &str, result_key: &str, expires_at: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        let job = GenerationJob {
            id,
            user_id: None,
            session_key: Some("sess-seeded".into()),
            figure_name: "Cleopatra".into(),
            prompt: "You as Cleopatra".into(),
            source_key: source_key.to_string(),
            result_key: result_key.to_string(),
            status: JobStatus::Completed,
            error: None,
            created_at: expires_at - Duration::hours(48),
            completed_at: Some(expires_at - Duration::hours(48)),
            expires_at,
            is_expired: false,
            cleanup_attempted: false,
        };
        self.jobs.lock().unwrap().insert(id, job);
        id
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, new: NewJob) -> Result<GenerationJob, JobStoreError> {
        let now = Utc::now();
        let job = GenerationJob {
            id: Uuid::new_v4(),
            user_id: new.owner.user_id().map(String::from),
            session_key: new.owner.session_key().map(String::from),
            figure_name: new.figure_name,
            prompt: new.prompt,
            source_key: new.source_key,
            result_key: String::new(),
            status: JobStatus::Pending,
            error: None,
            created_at: now,
            completed_at: None,
            expires_at: now + new.retention,
            is_expired: false,
            cleanup_attempted: false,
        };
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn mark_processing(&self, id: Uuid) -> Result<(), JobStoreError> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            job.status = JobStatus::Processing;
        }
        Ok(())
    }

    async fn complete(&self, id: Uuid, result_key: &str) -> Result<(), JobStoreError> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            job.status = JobStatus::Completed;
            job.result_key = result_key.to_string();
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<(), JobStoreError> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<GenerationJob>, JobStoreError> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn cleanup_batch(
        &self,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<Vec<GenerationJob>, JobStoreError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| !j.cleanup_attempted && (force || (j.expires_at < now && !j.is_expired)))
            .cloned()
            .collect())
    }

    async fn mark_cleanup_attempted(&self, id: Uuid) -> Result<(), JobStoreError> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            job.cleanup_attempted = true;
            job.is_expired = true;
        }
        Ok(())
    }
}

/// Job store whose writes always fail, for persistence-error paths.
pub struct BrokenJobStore;

#[async_trait]
impl JobStore for BrokenJobStore {
    async fn create(&self, _new: NewJob) -> Result<GenerationJob, JobStoreError> {
        Err(JobStoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn mark_processing(&self, _id: Uuid) -> Result<(), JobStoreError> {
        Err(JobStoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn complete(&self, _id: Uuid, _result_key: &str) -> Result<(), JobStoreError> {
        Err(JobStoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn fail(&self, _id: Uuid, _error: &str) -> Result<(), JobStoreError> {
        Err(JobStoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn get(&self, _id: Uuid) -> Result<Option<GenerationJob>, JobStoreError> {
        Err(JobStoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn cleanup_batch(
        &self,
        _now: DateTime<Utc>,
        _force: bool,
    ) -> Result<Vec<GenerationJob>, JobStoreError> {
        Err(JobStoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn mark_cleanup_attempted(&self, _id: Uuid) -> Result<(), JobStoreError> {
        Err(JobStoreError::Database(sqlx::Error::PoolTimedOut))
    }
}

// ── Quota store ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryQuotaStore {
    pub rows: Mutex<HashMap<String, UsageQuota>>,
    pub checks: AtomicU32,
}

impl MemoryQuotaStore {
    pub fn used(&self, session_key: &str, kind: QuotaKind) -> i32 {
        self.rows
            .lock()
            .unwrap()
            .get(session_key)
            .map(|q| q.used(kind))
            .unwrap_or(0)
    }

    /// Pre-exhaust a session's counter for a kind.
    pub fn exhaust(&self, session_key: &str, kind: QuotaKind) {
        let mut rows = self.rows.lock().unwrap();
        let quota = rows
            .entry(session_key.to_string())
            .or_insert_with(|| UsageQuota::fresh(session_key));
        match kind {
            QuotaKind::Match => quota.matches_used = kind.limit(),
            QuotaKind::Randomize => quota.randomizes_used = kind.limit(),
        }
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn check(&self, owner: &JobOwner, kind: QuotaKind) -> Result<QuotaDecision, QuotaError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let Some(key) = owner.session_key() else {
            return Ok(QuotaDecision {
                allowed: true,
                usage: UsageSnapshot::unlimited(),
            });
        };
        let mut rows = self.rows.lock().unwrap();
        let quota = rows
            .entry(key.to_string())
            .or_insert_with(|| UsageQuota::fresh(key));
        Ok(QuotaDecision {
            allowed: quota.allows(kind),
            usage: UsageSnapshot::from(&*quota),
        })
    }

    async fn commit(&self, owner: &JobOwner, kind: QuotaKind) -> Result<bool, QuotaError> {
        let Some(key) = owner.session_key() else {
            return Ok(true);
        };
        let mut rows = self.rows.lock().unwrap();
        let quota = rows
            .entry(key.to_string())
            .or_insert_with(|| UsageQuota::fresh(key));
        // Conditional increment under the row lock, like the SQL version.
        let counter = match kind {
            QuotaKind::Match => &mut quota.matches_used,
            QuotaKind::Randomize => &mut quota.randomizes_used,
        };
        if *counter < kind.limit() {
            *counter += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn snapshot(&self, owner: &JobOwner) -> Result<UsageSnapshot, QuotaError> {
        let Some(key) = owner.session_key() else {
            return Ok(UsageSnapshot::unlimited());
        };
        let mut rows = self.rows.lock().unwrap();
        let quota = rows
            .entry(key.to_string())
            .or_insert_with(|| UsageQuota::fresh(key));
        Ok(UsageSnapshot::from(&*quota))
    }
}

// ── Fusion backends ──────────────────────────────────────────────────

/// Succeeds every time, counting invocations.
#[derive(Default)]
pub struct SucceedingBackend {
    pub calls: AtomicU32,
}

#[async_trait]
impl FusionBackend for SucceedingBackend {
    async fn fuse(&self, _source_url: &str, _target_url: &str) -> Result<Vec<u8>, FusionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(b"fused-jpeg-bytes".to_vec())
    }
}

/// Always fails with a permanent error, counting invocations.
#[derive(Default)]
pub struct FailingBackend {
    pub calls: AtomicU32,
}

#[async_trait]
impl FusionBackend for FailingBackend {
    async fn fuse(&self, _source_url: &str, _target_url: &str) -> Result<Vec<u8>, FusionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(FusionError::Permanent("no face detected".into()))
    }
}

/// Rate-limits the first `failures` calls, then succeeds.
pub struct RateLimitedBackend {
    pub calls: AtomicU32,
    pub failures: u32,
}

impl RateLimitedBackend {
    pub fn failing_times(failures: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            failures,
        }
    }
}

#[async_trait]
impl FusionBackend for RateLimitedBackend {
    async fn fuse(&self, _source_url: &str, _target_url: &str) -> Result<Vec<u8>, FusionError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            Err(FusionError::RateLimited("please slow down".into()))
        } else {
            Ok(b"fused-jpeg-bytes".to_vec())
        }
    }
}

/// Blocks until released, to hold capacity slots open in burst tests.
pub struct GatedBackend {
    pub calls: AtomicU32,
    gate: tokio::sync::watch::Receiver<bool>,
}

impl GatedBackend {
    pub fn new() -> (Arc<Self>, tokio::sync::watch::Sender<bool>) {
        let (tx, rx) = tokio::sync::watch::channel(false);
        (
            Arc::new(Self {
                calls: AtomicU32::new(0),
                gate: rx,
            }),
            tx,
        )
    }
}

#[async_trait]
impl FusionBackend for GatedBackend {
    async fn fuse(&self, _source_url: &str, _target_url: &str) -> Result<Vec<u8>, FusionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.clone();
        while !*gate.borrow() {
            if gate.changed().await.is_err() {
                break;
            }
        }
        Ok(b"fused-jpeg-bytes".to_vec())
    }
}

/// Panics mid-call, for slot-release-on-panic tests.
pub struct PanickingBackend;

#[async_trait]
impl FusionBackend for PanickingBackend {
    async fn fuse(&self, _source_url: &str, _target_url: &str) -> Result<Vec<u8>, FusionError> {
        panic!("backend exploded");
    }
}
