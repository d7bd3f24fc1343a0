//! racecast-pipeline library interface
//!
//! Race-day prediction pipeline: fetch race cards and histories, parse them
//! into typed cards, build feature vectors, score with a weighted model
//! ensemble and persist append-only predictions. The HTTP layer and the
//! binary are thin wrappers over [`workflow::Orchestrator`].

pub mod api;
pub mod db;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod fetch;
pub mod models;
pub mod parse;
pub mod types;
pub mod utils;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult};

use anyhow::Context;
use axum::Router;
use chrono::{DateTime, NaiveDate, Utc};
use racecast_common::config::PipelineConfig;
use racecast_common::events::EventBus;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::db::PredictionStore;
use crate::fetch::HttpSource;
use crate::workflow::Orchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Pipeline events, streamed to SSE clients
    pub event_bus: EventBus,
    pub orchestrator: Orchestrator,
    pub config: Arc<PipelineConfig>,
    /// Race date → id of the trigger currently running for it
    pub active_triggers: Arc<RwLock<HashMap<NaiveDate, Uuid>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last trigger-level error for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        orchestrator: Orchestrator,
        config: PipelineConfig,
    ) -> Self {
        Self {
            db,
            event_bus,
            orchestrator,
            config: Arc::new(config),
            active_triggers: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Open the database under `root_folder` and wire the HTTP-backed pipeline
    pub async fn from_config(config: PipelineConfig, root_folder: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(root_folder).with_context(|| {
            format!("Failed to create root folder {}", root_folder.display())
        })?;

        let db_path = racecast_common::config::database_path(root_folder);
        info!("Database: {}", db_path.display());
        let db = db::init_database_pool(&db_path)
            .await
            .context("Failed to open database")?;

        let event_bus = EventBus::default();
        let source = HttpSource::new(&config.sources).context("Failed to build document source")?;
        let store = Arc::new(PredictionStore::new(db.clone()));
        let orchestrator =
            Orchestrator::from_config(&config, Arc::new(source), store, event_bus.clone())
                .context("Failed to configure pipeline")?;

        Ok(Self::new(db, event_bus, orchestrator, config))
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::health_routes())
        .merge(api::trigger_routes())
        .merge(api::prediction_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
