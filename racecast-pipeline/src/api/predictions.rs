//! Prediction read endpoints
//!
//! - `GET /predictions?from=&to=`: current revision of every stored
//!   prediction for races in the date range
//! - `GET /predictions/:date/:venue/:race`: current revision for one race
//!   under the configured model-version set
//! - `GET /predictions/:date/:venue/:race/history`: every revision, oldest first

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use racecast_common::time::{parse_race_date, race_date_at};
use serde::Deserialize;

use crate::models::{Prediction, RaceIdentifier};
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// GET /predictions?from=YYYY-MM-DD&to=YYYY-MM-DD
///
/// Both bounds are inclusive. A missing `from` means today; a missing `to`
/// means `from`.
pub async fn list_predictions(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<Vec<Prediction>>> {
    let from = match query.from.as_deref() {
        Some(date) => parse_race_date(date)?,
        None => race_date_at(chrono::Utc::now(), state.config.orchestrator.utc_offset_hours)?,
    };
    let to = match query.to.as_deref() {
        Some(date) => parse_race_date(date)?,
        None => from,
    };

    let predictions = state.orchestrator.store().between(from, to).await?;
    Ok(Json(predictions))
}

/// GET /predictions/:date/:venue/:race
pub async fn get_prediction(
    State(state): State<AppState>,
    Path((date, venue, race)): Path<(String, String, String)>,
) -> ApiResult<Json<Prediction>> {
    let race = race_from_path(&date, &venue, &race)?;
    let model_versions = state.orchestrator.model_versions();

    state
        .orchestrator
        .store()
        .latest(&race, &model_versions)
        .await?
        .map(Json)
        .ok_or_else(|| {
            ApiError::NotFound(format!("no prediction for {} [{}]", race, model_versions))
        })
}

/// GET /predictions/:date/:venue/:race/history
pub async fn get_prediction_history(
    State(state): State<AppState>,
    Path((date, venue, race)): Path<(String, String, String)>,
) -> ApiResult<Json<Vec<Prediction>>> {
    let race = race_from_path(&date, &venue, &race)?;
    let model_versions = state.orchestrator.model_versions();

    let history = state
        .orchestrator
        .store()
        .history(&race, &model_versions)
        .await?;
    if history.is_empty() {
        return Err(ApiError::NotFound(format!(
            "no prediction for {} [{}]",
            race, model_versions
        )));
    }
    Ok(Json(history))
}

/// Race number segment accepts `R11`, `r11` or `11`
fn race_from_path(date: &str, venue: &str, race: &str) -> ApiResult<RaceIdentifier> {
    let date: NaiveDate = parse_race_date(date)?;
    let digits = race.trim().trim_start_matches(['R', 'r']);
    let number: u8 = digits
        .parse()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid race number '{}'", race)))?;
    if venue.trim().is_empty() {
        return Err(ApiError::BadRequest("venue must not be empty".to_string()));
    }
    Ok(RaceIdentifier::new(date, venue, number))
}

/// Build prediction routes
pub fn prediction_routes() -> Router<AppState> {
    Router::new()
        .route("/predictions", get(list_predictions))
        .route("/predictions/:date/:venue/:race", get(get_prediction))
        .route(
            "/predictions/:date/:venue/:race/history",
            get(get_prediction_history),
        )
}
