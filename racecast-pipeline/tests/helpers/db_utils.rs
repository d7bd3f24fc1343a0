//! Store and orchestrator construction for tests

use racecast_common::config::{EnsembleConfig, FeatureConfig};
use racecast_common::events::EventBus;
use racecast_pipeline::db::{init_database_pool, PredictionStore};
use racecast_pipeline::ensemble::ensemble_from_config;
use racecast_pipeline::features::FeatureBuilder;
use racecast_pipeline::fetch::{Fetcher, RetryPolicy};
use racecast_pipeline::parse::Parser;
use racecast_pipeline::workflow::{Orchestrator, OrchestratorSettings};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use super::ScriptedSource;

/// File-backed store in a temporary directory
///
/// The TempDir must be kept alive for the duration of the test.
pub async fn create_test_store() -> (TempDir, Arc<PredictionStore>) {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database_pool(&temp_dir.path().join("racecast_test.db"))
        .await
        .unwrap();
    (temp_dir, Arc::new(PredictionStore::new(pool)))
}

/// Defaults with a short deadline so timeout tests finish quickly
pub fn test_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        max_concurrent_races: 4,
        trigger_timeout: Duration::from_secs(10),
        reuse_existing: true,
        abort_grace: Duration::from_millis(200),
    }
}

/// Orchestrator over the built-in models, retrying three times without delay
pub fn test_orchestrator(
    source: Arc<ScriptedSource>,
    store: Arc<PredictionStore>,
    event_bus: EventBus,
    settings: OrchestratorSettings,
) -> Orchestrator {
    Orchestrator::new(
        Fetcher::new(source, RetryPolicy::immediate(3)),
        Parser::default(),
        FeatureBuilder::from_config(&FeatureConfig::default()).unwrap(),
        ensemble_from_config(&[], &EnsembleConfig::default()).unwrap(),
        store,
        event_bus,
        settings,
    )
}
