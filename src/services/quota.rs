use async_trait::async_trait;

use crate::models::job::JobOwner;
use crate::models::usage::{QuotaKind, UsageSnapshot};

/// Outcome of a pre-flight quota check.
#[derive(Debug, Clone)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub usage: UsageSnapshot,
}

/// Per-identity usage quota seam.
///
/// The check runs before any expensive work so exhausted identities are
/// rejected cheaply; the commit runs only after the transform succeeded so
/// a failed fusion never burns a one-shot quota. Authenticated users are
/// always allowed and their counters are never touched.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn check(&self, owner: &JobOwner, kind: QuotaKind) -> Result<QuotaDecision, QuotaError>;

    /// Atomically consume one unit of `kind`. Returns false when a
    /// concurrent duplicate already took the last unit; the counter can
    /// never pass its limit.
    async fn commit(&self, owner: &JobOwner, kind: QuotaKind) -> Result<bool, QuotaError>;

    /// Current usage for display; lazily creates the session row.
    async fn snapshot(&self, owner: &JobOwner) -> Result<UsageSnapshot, QuotaError>;
}

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
