use clap::Parser;
use facefuse::{
    config::AppConfig,
    db::{self, jobs::PgJobStore},
    services::{
        cleanup::{ExpiryScheduler, SweepOptions},
        storage::R2Client,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Manually trigger the expired-artifact cleanup sweep.
#[derive(Parser)]
#[command(name = "cleanup", about = "Clean up expired generated images")]
struct Args {
    /// Clean everything not yet attempted, regardless of expiry
    #[arg(long)]
    force: bool,

    /// Report what would be deleted without deleting anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let args = Args::parse();

    tracing::info!(force = args.force, dry_run = args.dry_run, "Starting cleanup sweep");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize R2 storage client
    let storage = R2Client::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
        &config.r2_public_base,
    )
    .expect("Failed to initialize R2 client");

    let scheduler = ExpiryScheduler::new(
        Arc::new(PgJobStore::new(db_pool)),
        Arc::new(storage),
        Duration::from_secs(config.cleanup_interval_hours * 60 * 60),
    );

    // Per-item failures are reported in the counts; only a query-level
    // failure is a non-zero exit.
    match scheduler
        .sweep(SweepOptions {
            force: args.force,
            dry_run: args.dry_run,
        })
        .await
    {
        Ok(report) => {
            tracing::info!(
                scanned = report.scanned,
                deleted = report.deleted,
                failed = report.failed,
                "Cleanup sweep finished"
            );
            println!(
                "cleanup: scanned={} deleted={} failed={}{}",
                report.scanned,
                report.deleted,
                report.failed,
                if args.dry_run { " (dry run)" } else { "" }
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Cleanup sweep failed");
            eprintln!("cleanup failed: {e}");
            std::process::exit(1);
        }
    }
}
