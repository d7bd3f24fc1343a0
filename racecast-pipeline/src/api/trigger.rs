//! Manual trigger endpoint
//!
//! POST /trigger runs one trigger to completion and returns its batch report.
//! Only one trigger per race date runs at a time.

use axum::{extract::State, routing::post, Json, Router};
use chrono::{NaiveDate, Utc};
use futures::FutureExt;
use racecast_common::time::{parse_race_date, race_date_at};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::models::{TriggerEvent, TriggerSource};
use crate::workflow::BatchReport;
use crate::{ApiError, ApiResult, AppState};

/// Request body; `{}` triggers today's races
#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    /// Race date as `YYYY-MM-DD`; defaults to today in the race calendar's offset
    #[serde(default)]
    pub date: Option<String>,
    /// Recompute races that already have a stored prediction
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub trigger_id: Uuid,
    pub race_date: NaiveDate,
    pub succeeded: usize,
    pub failed: usize,
    /// Delivery text
    pub summary: String,
    pub report: BatchReport,
}

/// POST /trigger
///
/// **Request:** `{"date": "2026-10-18", "force": false}` (both optional)
///
/// **Errors:**
/// - 400 Bad Request: malformed date
/// - 409 Conflict: a trigger for the same date is still running
pub async fn run_trigger(
    State(state): State<AppState>,
    Json(request): Json<TriggerRequest>,
) -> ApiResult<Json<TriggerResponse>> {
    let issued_at = Utc::now();
    let race_date = match request.date.as_deref() {
        Some(date) => parse_race_date(date)?,
        None => race_date_at(issued_at, state.config.orchestrator.utc_offset_hours)?,
    };

    let mut trigger = TriggerEvent::new(race_date, issued_at, TriggerSource::Manual);
    if request.force {
        trigger = trigger.forced();
    }

    {
        let mut active = state.active_triggers.write().await;
        if let Some(running) = active.get(&race_date) {
            return Err(ApiError::Conflict(format!(
                "trigger {} for {} is still running",
                running, race_date
            )));
        }
        active.insert(race_date, trigger.trigger_id);
    }

    info!(trigger_id = %trigger.trigger_id, %race_date, force = trigger.force, "Manual trigger accepted");

    // Runs to completion even if the client disconnects
    let task_state = state.clone();
    let handle = tokio::spawn(async move {
        let outcome = release_when_done(
            task_state.active_triggers.clone(),
            trigger.race_date,
            task_state.orchestrator.run_trigger(&trigger),
        )
        .await;
        let error = match &outcome {
            Ok(report) => report.discovery_failure.as_ref().map(|f| f.to_string()),
            Err(panic) => Some(format!("trigger {} panicked: {}", trigger.trigger_id, panic)),
        };
        if let Some(error) = error {
            *task_state.last_error.write().await = Some(error);
        }
        outcome
    });

    let report = handle
        .await
        .map_err(|e| ApiError::Internal(format!("trigger task failed: {}", e)))?
        .map_err(|panic| ApiError::Internal(format!("trigger failed: {}", panic)))?;

    Ok(Json(TriggerResponse {
        trigger_id: report.trigger_id,
        race_date: report.race_date,
        succeeded: report.succeeded(),
        failed: report.failed(),
        summary: report.render_summary(),
        report,
    }))
}

/// Run `work`, then free the date for new triggers even if `work` panicked
async fn release_when_done<F>(
    active_triggers: Arc<RwLock<HashMap<NaiveDate, Uuid>>>,
    race_date: NaiveDate,
    work: F,
) -> Result<F::Output, String>
where
    F: Future,
{
    let outcome = AssertUnwindSafe(work).catch_unwind().await;
    active_triggers.write().await.remove(&race_date);
    outcome.map_err(|panic| {
        panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string())
    })
}

/// Build trigger routes
pub fn trigger_routes() -> Router<AppState> {
    Router::new().route("/trigger", post(run_trigger))
}
