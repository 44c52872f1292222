use sqlx::PgPool;
use std::sync::Arc;

use crate::services::orchestrator::JobOrchestrator;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub orchestrator: Arc<JobOrchestrator>,
}

impl AppState {
    pub fn new(db: PgPool, orchestrator: Arc<JobOrchestrator>) -> Self {
        Self { db, orchestrator }
    }
}
