//! Trigger orchestration
//!
//! One worker task per race, bounded by a semaphore, all sharing the
//! trigger's cancellation token. A timer cancels the token at the trigger
//! deadline; workers that still have not returned a short grace period
//! later are aborted and recorded from their last persisted stage.

use chrono::Utc;
use racecast_common::config::{OrchestratorConfig, PipelineConfig};
use racecast_common::events::{EventBus, PipelineEvent};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::report::{BatchReport, RaceOutcome, RaceResult};
use crate::db::{runs, CacheOutcome, PredictionStore};
use crate::ensemble::{ensemble_from_config, Ensemble};
use crate::features::FeatureBuilder;
use crate::fetch::{DocumentKey, DocumentSource, Fetcher, RetryPolicy};
use crate::models::{
    HistoryIndex, ModelVersionSet, PipelineRun, PipelineStage, Prediction, RaceIdentifier,
    TriggerEvent,
};
use crate::parse::Parser;
use crate::types::{FetchFailure, StageFailure, StoreFailure, TimeoutFailure, WorkerFailure};

/// Time between the trigger deadline and aborting workers that ignored it
pub const ABORT_GRACE: Duration = Duration::from_secs(5);

/// Stage label used for a timeout during race discovery
const DISCOVERY_STAGE: &str = "discovery";

/// Last known run record per race, for races whose worker never reports
type LiveRuns = Arc<Mutex<BTreeMap<RaceIdentifier, PipelineRun>>>;

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_concurrent_races: usize,
    pub trigger_timeout: Duration,
    /// Return stored predictions without refetching unless the trigger forces
    pub reuse_existing: bool,
    pub abort_grace: Duration,
}

impl From<&OrchestratorConfig> for OrchestratorSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_concurrent_races: config.max_concurrent_races.max(1),
            trigger_timeout: Duration::from_secs(config.trigger_timeout_secs),
            reuse_existing: config.reuse_existing,
            abort_grace: ABORT_GRACE,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

/// Stage components shared by every worker
struct PipelineContext {
    fetcher: Fetcher,
    parser: Parser,
    features: FeatureBuilder,
    ensemble: Ensemble,
    store: Arc<PredictionStore>,
    event_bus: EventBus,
    db: SqlitePool,
    settings: OrchestratorSettings,
}

/// Runs triggers end to end
#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
}

impl Orchestrator {
    pub fn new(
        fetcher: Fetcher,
        parser: Parser,
        features: FeatureBuilder,
        ensemble: Ensemble,
        store: Arc<PredictionStore>,
        event_bus: EventBus,
        settings: OrchestratorSettings,
    ) -> Self {
        let db = store.pool().clone();
        Self {
            ctx: Arc::new(PipelineContext {
                fetcher,
                parser,
                features,
                ensemble,
                store,
                event_bus,
                db,
                settings,
            }),
        }
    }

    /// Wire every stage from configuration around the given document source
    pub fn from_config(
        config: &PipelineConfig,
        source: Arc<dyn DocumentSource>,
        store: Arc<PredictionStore>,
        event_bus: EventBus,
    ) -> racecast_common::Result<Self> {
        let fetcher = Fetcher::new(source, RetryPolicy::from(&config.retry));
        let parser = Parser::new(config.parser.min_card_completeness);
        let features = FeatureBuilder::from_config(&config.features)?;
        let ensemble = ensemble_from_config(&config.models, &config.ensemble)?;

        info!(
            models = %ensemble.model_versions(),
            policy = ensemble.policy().as_str(),
            schema = %features.schema_version(),
            "Pipeline configured"
        );

        Ok(Self::new(
            fetcher,
            parser,
            features,
            ensemble,
            store,
            event_bus,
            OrchestratorSettings::from(&config.orchestrator),
        ))
    }

    pub fn store(&self) -> &Arc<PredictionStore> {
        &self.ctx.store
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.ctx.settings
    }

    /// Model-version set every prediction from this orchestrator is keyed by
    pub fn model_versions(&self) -> ModelVersionSet {
        self.ctx.ensemble.model_versions()
    }

    /// Discover the trigger date's races and run each to a terminal stage
    ///
    /// Never fails as a whole: a discovery failure is reported on the batch,
    /// race failures on their outcomes.
    pub async fn run_trigger(&self, trigger: &TriggerEvent) -> BatchReport {
        let ctx = &self.ctx;
        let start_time = Instant::now();

        info!(
            trigger_id = %trigger.trigger_id,
            race_date = %trigger.race_date,
            force = trigger.force,
            "Starting trigger"
        );
        ctx.event_bus.emit_lossy(PipelineEvent::TriggerStarted {
            trigger_id: trigger.trigger_id,
            race_date: trigger.race_date.to_string(),
            timestamp: Utc::now(),
        });

        let cancel = CancellationToken::new();
        let deadline = tokio::time::Instant::now() + ctx.settings.trigger_timeout;
        let timer = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                cancel.cancel();
            })
        };

        let report = match self.discover(trigger, &cancel).await {
            Ok(races) => {
                ctx.event_bus.emit_lossy(PipelineEvent::RacesDiscovered {
                    trigger_id: trigger.trigger_id,
                    race_count: races.len(),
                    timestamp: Utc::now(),
                });
                let outcomes = self.run_races(trigger, races, &cancel, deadline).await;
                BatchReport::new(trigger.trigger_id, trigger.race_date, trigger.issued_at, outcomes)
            }
            Err(failure) => {
                error!(
                    trigger_id = %trigger.trigger_id,
                    race_date = %trigger.race_date,
                    error = %failure,
                    "Race discovery failed"
                );
                BatchReport::discovery_failed(
                    trigger.trigger_id,
                    trigger.race_date,
                    trigger.issued_at,
                    failure,
                )
            }
        };
        timer.abort();

        info!(
            trigger_id = %trigger.trigger_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Trigger completed"
        );
        ctx.event_bus.emit_lossy(PipelineEvent::TriggerCompleted {
            trigger_id: trigger.trigger_id,
            succeeded: report.succeeded(),
            failed: report.failed(),
            timestamp: Utc::now(),
        });

        report
    }

    async fn discover(
        &self,
        trigger: &TriggerEvent,
        cancel: &CancellationToken,
    ) -> Result<Vec<RaceIdentifier>, StageFailure> {
        let key = DocumentKey::CardIndex {
            date: trigger.race_date,
        };
        let doc = self
            .ctx
            .fetcher
            .fetch(&key, cancel)
            .await
            .map_err(|f| self.ctx.fetch_failure(f, DISCOVERY_STAGE))?;
        let races = self.ctx.parser.parse_card_index(trigger.race_date, &doc)?;

        info!(race_date = %trigger.race_date, count = races.len(), "Races discovered");
        Ok(races)
    }

    async fn run_races(
        &self,
        trigger: &TriggerEvent,
        races: Vec<RaceIdentifier>,
        cancel: &CancellationToken,
        deadline: tokio::time::Instant,
    ) -> Vec<RaceOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.ctx.settings.max_concurrent_races));
        let live: LiveRuns = Arc::new(Mutex::new(BTreeMap::new()));
        let mut workers = JoinSet::new();

        for race in &races {
            let ctx = Arc::clone(&self.ctx);
            let trigger = trigger.clone();
            let race = race.clone();
            let cancel = cancel.clone();
            let semaphore = Arc::clone(&semaphore);
            let live = Arc::clone(&live);
            workers.spawn(async move {
                let mut tracker = RunTracker::start(&ctx, &trigger, race, live).await;

                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let result = match permit {
                    Some(_permit) => process_race(&ctx, &trigger, &mut tracker, &cancel).await,
                    None => Err(ctx.timeout_failure(&tracker.run.stage.label()).into()),
                };
                tracker.finish(result).await
            });
        }

        let mut outcomes: BTreeMap<RaceIdentifier, RaceOutcome> = BTreeMap::new();
        let hard_stop = deadline + self.ctx.settings.abort_grace;
        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    Some(joined) => record_joined(joined, &mut outcomes),
                    None => break,
                },
                _ = tokio::time::sleep_until(hard_stop) => {
                    warn!(
                        trigger_id = %trigger.trigger_id,
                        remaining = workers.len(),
                        "Workers still running past the trigger deadline, aborting"
                    );
                    workers.abort_all();
                    while let Some(joined) = workers.join_next().await {
                        record_joined(joined, &mut outcomes);
                    }
                    break;
                }
            }
        }

        // Races whose worker panicked or was aborted
        for race in races {
            if outcomes.contains_key(&race) {
                continue;
            }
            let snapshot = live_snapshot(&live, &race);
            let run = snapshot.unwrap_or_else(|| PipelineRun::new(trigger.trigger_id, race.clone()));
            let failure: StageFailure = if cancel.is_cancelled() {
                self.ctx.timeout_failure(&run.stage.label()).into()
            } else {
                WorkerFailure {
                    message: format!("worker for {} ended without an outcome", race),
                }
                .into()
            };
            let outcome = RunTracker::resume(&self.ctx, run).finish(Err(failure)).await;
            outcomes.insert(race, outcome);
        }

        outcomes.into_values().collect()
    }
}

impl PipelineContext {
    /// Cancelled fetches become timeouts; everything else stays a fetch failure
    fn fetch_failure(&self, failure: FetchFailure, stage: &str) -> StageFailure {
        if failure.is_cancelled() {
            self.timeout_failure(stage).into()
        } else {
            failure.into()
        }
    }

    fn timeout_failure(&self, stage: &str) -> TimeoutFailure {
        TimeoutFailure {
            timeout: self.settings.trigger_timeout,
            stage: stage.to_string(),
        }
    }

    fn ensure_live(&self, cancel: &CancellationToken, stage: PipelineStage) -> Result<(), StageFailure> {
        if cancel.is_cancelled() {
            return Err(self.timeout_failure(&stage.label()).into());
        }
        Ok(())
    }
}

fn record_joined(
    joined: Result<RaceOutcome, tokio::task::JoinError>,
    outcomes: &mut BTreeMap<RaceIdentifier, RaceOutcome>,
) {
    match joined {
        Ok(outcome) => {
            outcomes.insert(outcome.race.clone(), outcome);
        }
        Err(e) if e.is_cancelled() => debug!("Race worker aborted"),
        Err(e) => error!(error = %e, "Race worker panicked"),
    }
}

fn live_snapshot(live: &LiveRuns, race: &RaceIdentifier) -> Option<PipelineRun> {
    live.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .get(race)
        .cloned()
}

// ============================================================================
// Per-race worker
// ============================================================================

/// Reuse, force-recompute or get-or-compute one race
async fn process_race(
    ctx: &PipelineContext,
    trigger: &TriggerEvent,
    tracker: &mut RunTracker,
    cancel: &CancellationToken,
) -> Result<CacheOutcome, StageFailure> {
    let race = tracker.run.race.clone();
    let model_versions = ctx.ensemble.model_versions();

    if trigger.force {
        let prediction = compute(ctx, trigger, tracker, cancel).await?;
        ctx.store
            .append_revision(&prediction)
            .await
            .map_err(|e| StageFailure::from(StoreFailure::from(e)))?;
        return Ok(CacheOutcome {
            prediction,
            reused: false,
        });
    }

    if ctx.settings.reuse_existing {
        match ctx.store.latest(&race, &model_versions).await {
            Ok(Some(prediction)) => {
                debug!(race = %race, "Reusing stored prediction");
                return Ok(CacheOutcome {
                    prediction,
                    reused: true,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(race = %race, error = %e, "Stored prediction lookup failed, computing"),
        }
    }

    let tracker_ref = &mut *tracker;
    ctx.store
        .get_or_compute(&race, &model_versions, move || {
            compute(ctx, trigger, tracker_ref, cancel)
        })
        .await
}

/// Fetch, parse, build features and score one race
async fn compute(
    ctx: &PipelineContext,
    trigger: &TriggerEvent,
    tracker: &mut RunTracker,
    cancel: &CancellationToken,
) -> Result<Prediction, StageFailure> {
    let race = tracker.run.race.clone();

    // Fetching: the card, then every runner's and rider's history
    tracker.advance(PipelineStage::Fetching).await?;
    let card_doc = ctx
        .fetcher
        .fetch(&DocumentKey::RaceCard(race.clone()), cancel)
        .await
        .map_err(|f| ctx.fetch_failure(f, "fetching"))?;
    tracker.run.record_attempts(PipelineStage::Fetching, card_doc.attempts);
    let card = ctx.parser.parse_race_card(&race, &card_doc)?;

    let mut keys: Vec<DocumentKey> = card
        .horse_ids()
        .into_iter()
        .map(|horse_id| DocumentKey::HorseResults { horse_id })
        .collect();
    keys.extend(
        card.jockey_ids()
            .into_iter()
            .map(|jockey_id| DocumentKey::JockeyResults { jockey_id }),
    );

    let mut history_docs = Vec::with_capacity(keys.len());
    for (key, result) in ctx.fetcher.fetch_many(&keys, cancel).await {
        match result {
            Ok(doc) => {
                tracker.run.record_attempts(PipelineStage::Fetching, doc.attempts);
                history_docs.push(doc);
            }
            Err(f) if f.is_cancelled() => return Err(ctx.timeout_failure("fetching").into()),
            Err(f) => {
                // Features for this runner fall back to missing values
                warn!(race = %race, document = %key, error = %f, "History unavailable");
            }
        }
    }
    ctx.ensure_live(cancel, PipelineStage::Fetching)?;

    // Parsing
    tracker.advance(PipelineStage::Parsing).await?;
    let mut histories = HistoryIndex::default();
    for doc in &history_docs {
        // An unreadable history degrades like an unavailable one
        let parsed = match &doc.key {
            DocumentKey::HorseResults { .. } => ctx
                .parser
                .parse_horse_history(doc)
                .map(|history| histories.insert_horse(history)),
            DocumentKey::JockeyResults { .. } => ctx
                .parser
                .parse_jockey_history(doc)
                .map(|history| histories.insert_jockey(history)),
            _ => Ok(()),
        };
        if let Err(failure) = parsed {
            warn!(race = %race, document = %doc.key, error = %failure, "History unreadable");
        }
    }
    ctx.ensure_live(cancel, PipelineStage::Parsing)?;

    // FeatureBuilding
    tracker.advance(PipelineStage::FeatureBuilding).await?;
    let vectors = ctx.features.build(&card, &histories)?;
    ctx.ensure_live(cancel, PipelineStage::FeatureBuilding)?;

    // Scoring
    tracker.advance(PipelineStage::Scoring).await?;
    let prediction = ctx.ensemble.predict(
        &card,
        &vectors,
        &ctx.features.schema_version(),
        trigger.issued_at,
    )?;

    debug!(
        race = %race,
        entries = prediction.ranking.len(),
        confidence = prediction.confidence,
        "Race scored"
    );
    Ok(prediction)
}

// ============================================================================
// Run tracking
// ============================================================================

/// Owns a race's run record; persists and publishes every stage change
struct RunTracker {
    run: PipelineRun,
    db: SqlitePool,
    event_bus: EventBus,
    live: Option<LiveRuns>,
}

impl RunTracker {
    async fn start(
        ctx: &PipelineContext,
        trigger: &TriggerEvent,
        race: RaceIdentifier,
        live: LiveRuns,
    ) -> Self {
        let tracker = Self {
            run: PipelineRun::new(trigger.trigger_id, race),
            db: ctx.db.clone(),
            event_bus: ctx.event_bus.clone(),
            live: Some(live),
        };
        tracker.persist().await;
        tracker
    }

    /// Pick up a run whose worker is gone
    fn resume(ctx: &PipelineContext, run: PipelineRun) -> Self {
        Self {
            run,
            db: ctx.db.clone(),
            event_bus: ctx.event_bus.clone(),
            live: None,
        }
    }

    async fn advance(&mut self, stage: PipelineStage) -> Result<(), StageFailure> {
        let transition = self.run.transition_to(stage).map_err(|e| {
            StageFailure::from(WorkerFailure {
                message: e.to_string(),
            })
        })?;

        debug!(
            race = %self.run.race,
            from = %transition.old_stage,
            to = %transition.new_stage,
            "Stage changed"
        );
        self.event_bus.emit_lossy(PipelineEvent::StageChanged {
            run_id: self.run.run_id,
            race: self.run.race.to_string(),
            old_stage: transition.old_stage.label(),
            new_stage: transition.new_stage.label(),
            timestamp: transition.transitioned_at,
        });
        self.persist().await;
        Ok(())
    }

    /// Drive the run to Done or Failed and build the race outcome
    async fn finish(mut self, result: Result<CacheOutcome, StageFailure>) -> RaceOutcome {
        let race = self.run.race.clone();

        let result = match result {
            Ok(outcome) => {
                self.run.reused = outcome.reused;
                self.complete().await.map(|()| outcome)
            }
            Err(failure) => Err(failure),
        };

        match result {
            Ok(outcome) => {
                info!(race = %race, reused = outcome.reused, "Race completed");
                self.event_bus.emit_lossy(PipelineEvent::RaceCompleted {
                    run_id: self.run.run_id,
                    race: race.to_string(),
                    reused: outcome.reused,
                    timestamp: Utc::now(),
                });
                RaceOutcome {
                    race,
                    run: self.run,
                    result: RaceResult::Predicted {
                        prediction: outcome.prediction,
                    },
                    reused: outcome.reused,
                }
            }
            Err(failure) => {
                self.record_failure(&failure).await;
                RaceOutcome {
                    race,
                    run: self.run,
                    result: RaceResult::Unavailable { failure },
                    reused: false,
                }
            }
        }
    }

    async fn complete(&mut self) -> Result<(), StageFailure> {
        self.advance(PipelineStage::Cached).await?;
        self.advance(PipelineStage::Done).await
    }

    async fn record_failure(&mut self, failure: &StageFailure) {
        let point = failure.failure_point();
        if let Err(e) = self.run.fail(point, failure.to_string()) {
            // Already terminal; keep the first recorded outcome
            warn!(race = %self.run.race, error = %e, "Failure after terminal stage ignored");
            return;
        }

        warn!(race = %self.run.race, stage = %point, error = %failure, "Race failed");
        self.event_bus.emit_lossy(PipelineEvent::RaceFailed {
            run_id: self.run.run_id,
            race: self.run.race.to_string(),
            stage: point.to_string(),
            reason: failure.to_string(),
            timestamp: Utc::now(),
        });
        self.persist().await;
    }

    /// Run records are observational; a write failure never fails the race
    async fn persist(&self) {
        if let Some(live) = &self.live {
            live.lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(self.run.race.clone(), self.run.clone());
        }
        if let Err(e) = runs::save_run(&self.db, &self.run).await {
            warn!(race = %self.run.race, error = %e, "Failed to persist pipeline run");
        }
    }
}
