use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{GenerationJob, JobStatus};
use crate::services::jobs::{JobStore, JobStoreError, NewJob};

/// Postgres-backed job store.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const JOB_COLUMNS: &str = "id, user_id, session_key, figure_name, prompt, source_key, \
                           result_key, status, error, created_at, completed_at, expires_at, \
                           is_expired, cleanup_attempted";

fn job_from_row(row: &PgRow) -> Result<GenerationJob, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(GenerationJob {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        session_key: row.try_get("session_key")?,
        figure_name: row.try_get("figure_name")?,
        prompt: row.try_get("prompt")?,
        source_key: row.try_get("source_key")?,
        result_key: row.try_get("result_key")?,
        status: status.parse::<JobStatus>().unwrap_or(JobStatus::Pending),
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
        expires_at: row.try_get("expires_at")?,
        is_expired: row.try_get("is_expired")?,
        cleanup_attempted: row.try_get("cleanup_attempted")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, new: NewJob) -> Result<GenerationJob, JobStoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let expires_at = now + new.retention;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO generation_jobs
                (id, user_id, session_key, figure_name, prompt, source_key, status,
                 created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(new.owner.user_id())
        .bind(new.owner.session_key())
        .bind(&new.figure_name)
        .bind(&new.prompt)
        .bind(&new.source_key)
        .bind(now)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(job_from_row(&row)?)
    }

    async fn mark_processing(&self, id: Uuid) -> Result<(), JobStoreError> {
        sqlx::query("UPDATE generation_jobs SET status = 'processing' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn complete(&self, id: Uuid, result_key: &str) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'completed', result_key = $2, completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(result_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'failed', error = $2, completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<GenerationJob>, JobStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(r) => Some(job_from_row(&r)?),
            None => None,
        })
    }

    async fn cleanup_batch(
        &self,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<Vec<GenerationJob>, JobStoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM generation_jobs
            WHERE cleanup_attempted = FALSE
              AND ($2 OR (expires_at < $1 AND is_expired = FALSE))
            ORDER BY expires_at ASC
            "#
        ))
        .bind(now)
        .bind(force)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| job_from_row(r).map_err(JobStoreError::from))
            .collect()
    }

    async fn mark_cleanup_attempted(&self, id: Uuid) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            UPDATE generation_jobs
            SET cleanup_attempted = TRUE, is_expired = TRUE
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
