//! Pipeline run persistence
//!
//! Runs are upserted at every stage change so an interrupted trigger still
//! leaves a record of where each race stopped.

use racecast_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::db_timestamp;
use crate::models::PipelineRun;
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Insert or update a run record
pub async fn save_run(pool: &SqlitePool, run: &PipelineRun) -> Result<()> {
    // Prepare all data before touching the pool
    let run_id = run.run_id.to_string();
    let trigger_id = run.trigger_id.to_string();
    let race = run.race.to_string();
    let race_date = run.race.date.format("%Y-%m-%d").to_string();
    let stage = run.stage.label();
    let outcome = run.outcome.as_str();
    let reused = i64::from(run.reused);
    let record = serde_json::to_string(run)?;
    let started_at = db_timestamp(&run.started_at);
    let ended_at = run.ended_at.as_ref().map(db_timestamp);

    retry_on_lock("save_run", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (
                run_id, trigger_id, race, race_date, stage, outcome,
                error, reused, record, started_at, ended_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                stage = excluded.stage,
                outcome = excluded.outcome,
                error = excluded.error,
                reused = excluded.reused,
                record = excluded.record,
                ended_at = excluded.ended_at
            "#,
        )
        .bind(&run_id)
        .bind(&trigger_id)
        .bind(&race)
        .bind(&race_date)
        .bind(&stage)
        .bind(outcome)
        .bind(&run.error)
        .bind(reused)
        .bind(&record)
        .bind(&started_at)
        .bind(&ended_at)
        .execute(pool)
        .await?;

        Ok(())
    })
    .await
}

/// Load one run
pub async fn load_run(pool: &SqlitePool, run_id: Uuid) -> Result<Option<PipelineRun>> {
    let row = sqlx::query("SELECT record FROM pipeline_runs WHERE run_id = ?")
        .bind(run_id.to_string())
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let record: String = row.get("record");
            Ok(Some(serde_json::from_str(&record)?))
        }
        None => Ok(None),
    }
}

/// All runs started by one trigger, in race order
pub async fn runs_for_trigger(pool: &SqlitePool, trigger_id: Uuid) -> Result<Vec<PipelineRun>> {
    let rows = sqlx::query("SELECT record FROM pipeline_runs WHERE trigger_id = ? ORDER BY race")
        .bind(trigger_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.into_iter()
        .map(|row| -> Result<PipelineRun> {
            let record: String = row.get("record");
            Ok(serde_json::from_str(&record)?)
        })
        .collect()
}
