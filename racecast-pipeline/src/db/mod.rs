//! Persistence for predictions and pipeline runs

pub mod predictions;
pub mod runs;

pub use predictions::{CacheOutcome, PredictionStore};

use racecast_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Timestamp text stored in the database; fixed width so text order is time order
pub(crate) fn db_timestamp(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Open the database file and create pipeline tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = racecast_common::db::init_database(db_path).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create pipeline tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    // Append-only: a rerun adds a row with a later generated_at
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS predictions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            race_date TEXT NOT NULL,
            venue TEXT NOT NULL,
            race_number INTEGER NOT NULL,
            model_versions TEXT NOT NULL,
            generated_at TEXT NOT NULL,
            policy TEXT NOT NULL,
            feature_schema_version TEXT NOT NULL,
            input_fingerprint TEXT NOT NULL,
            confidence REAL NOT NULL,
            payload TEXT NOT NULL,
            stored_at TEXT NOT NULL,
            UNIQUE (race_date, venue, race_number, model_versions, generated_at)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_predictions_date ON predictions (race_date)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            run_id TEXT PRIMARY KEY,
            trigger_id TEXT NOT NULL,
            race TEXT NOT NULL,
            race_date TEXT NOT NULL,
            stage TEXT NOT NULL,
            outcome TEXT NOT NULL,
            error TEXT,
            reused INTEGER NOT NULL DEFAULT 0,
            record TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pipeline_runs_trigger ON pipeline_runs (trigger_id)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (predictions, pipeline_runs)");

    Ok(())
}
