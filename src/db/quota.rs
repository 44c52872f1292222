use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::models::job::JobOwner;
use crate::models::usage::{QuotaKind, UsageQuota, UsageSnapshot};
use crate::services::quota::{QuotaDecision, QuotaError, QuotaStore};

/// Postgres-backed usage quotas for anonymous sessions.
///
/// The session row is created lazily on first contact. Consumption is an
/// atomic conditional increment, so two concurrent requests sharing a
/// session can never push a counter past its limit.
pub struct PgQuotaStore {
    pool: PgPool,
}

impl PgQuotaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_or_create(&self, session_key: &str) -> Result<UsageQuota, QuotaError> {
        sqlx::query(
            "INSERT INTO usage_sessions (session_key) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(session_key)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT matches_used, randomizes_used FROM usage_sessions WHERE session_key = $1",
        )
        .bind(session_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(UsageQuota {
            session_key: session_key.to_string(),
            matches_used: row.try_get("matches_used")?,
            randomizes_used: row.try_get("randomizes_used")?,
        })
    }
}

#[async_trait]
impl QuotaStore for PgQuotaStore {
    async fn check(&self, owner: &JobOwner, kind: QuotaKind) -> Result<QuotaDecision, QuotaError> {
        let Some(session_key) = owner.session_key() else {
            return Ok(QuotaDecision {
                allowed: true,
                usage: UsageSnapshot::unlimited(),
            });
        };

        let quota = self.load_or_create(session_key).await?;
        Ok(QuotaDecision {
            allowed: quota.allows(kind),
            usage: UsageSnapshot::from(&quota),
        })
    }

    async fn commit(&self, owner: &JobOwner, kind: QuotaKind) -> Result<bool, QuotaError> {
        let Some(session_key) = owner.session_key() else {
            return Ok(true);
        };

        // Conditional increment: a no-op when a concurrent duplicate
        // already consumed the last unit.
        let query = match kind {
            QuotaKind::Match => {
                "UPDATE usage_sessions
                 SET matches_used = matches_used + 1
                 WHERE session_key = $1 AND matches_used < $2"
            }
            QuotaKind::Randomize => {
                "UPDATE usage_sessions
                 SET randomizes_used = randomizes_used + 1
                 WHERE session_key = $1 AND randomizes_used < $2"
            }
        };

        let result = sqlx::query(query)
            .bind(session_key)
            .bind(kind.limit())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn snapshot(&self, owner: &JobOwner) -> Result<UsageSnapshot, QuotaError> {
        let Some(session_key) = owner.session_key() else {
            return Ok(UsageSnapshot::unlimited());
        };
        let quota = self.load_or_create(session_key).await?;
        Ok(UsageSnapshot::from(&quota))
    }
}
