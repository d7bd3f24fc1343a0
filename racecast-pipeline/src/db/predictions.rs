//! Prediction store
//!
//! Append-only table keyed by (race, model-version set, generated_at). The
//! latest revision for a key is the current prediction; nothing is ever
//! updated in place.
//!
//! `get_or_compute` guarantees one computation per key: callers take a
//! per-key async mutex, re-check the table under it, and only then compute.

use chrono::{NaiveDate, Utc};
use racecast_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use super::db_timestamp;
use crate::models::{ModelVersionSet, Prediction, RaceIdentifier};
use crate::types::{StageFailure, StoreFailure};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

type StoreKey = (RaceIdentifier, String);
type KeyLocks = HashMap<StoreKey, Arc<tokio::sync::Mutex<()>>>;

/// Result of [`PredictionStore::get_or_compute`]
#[derive(Debug, Clone)]
pub struct CacheOutcome {
    pub prediction: Prediction,
    /// True when an existing revision was returned without computing
    pub reused: bool,
}

pub struct PredictionStore {
    pool: SqlitePool,
    key_locks: Mutex<KeyLocks>,
    max_lock_wait_ms: u64,
}

impl PredictionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            key_locks: Mutex::new(HashMap::new()),
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn locks(&self) -> MutexGuard<'_, KeyLocks> {
        self.key_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key_lock(&self, key: &StoreKey) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.locks().entry(key.clone()).or_default())
    }

    /// Drop the key's lock entry once nobody else holds or awaits it
    fn release_key_lock(&self, key: &StoreKey, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks();
        // One reference in the map, one held here
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(key);
        }
    }

    /// Latest stored revision, or compute, persist and return a new one
    ///
    /// Concurrent callers for the same key observe one computation and get
    /// the same prediction.
    pub async fn get_or_compute<F, Fut>(
        &self,
        race: &RaceIdentifier,
        model_versions: &ModelVersionSet,
        compute: F,
    ) -> std::result::Result<CacheOutcome, StageFailure>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Prediction, StageFailure>>,
    {
        if let Some(prediction) = self.latest(race, model_versions).await.map_err(store_failure)? {
            return Ok(CacheOutcome {
                prediction,
                reused: true,
            });
        }

        let key = (race.clone(), model_versions.key());
        let lock = self.key_lock(&key);
        let outcome = {
            let _guard = lock.lock().await;
            self.compute_locked(race, model_versions, compute).await
        };
        self.release_key_lock(&key, lock);
        outcome
    }

    async fn compute_locked<F, Fut>(
        &self,
        race: &RaceIdentifier,
        model_versions: &ModelVersionSet,
        compute: F,
    ) -> std::result::Result<CacheOutcome, StageFailure>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Prediction, StageFailure>>,
    {
        // Another caller may have finished while we waited for the lock
        if let Some(prediction) = self.latest(race, model_versions).await.map_err(store_failure)? {
            debug!(race = %race, "Prediction computed by concurrent caller");
            return Ok(CacheOutcome {
                prediction,
                reused: true,
            });
        }

        let prediction = compute().await?;
        if &prediction.race != race || &prediction.model_versions != model_versions {
            return Err(StoreFailure {
                message: format!(
                    "computed prediction for {} [{}] does not match key {} [{}]",
                    prediction.race, prediction.model_versions, race, model_versions
                ),
            }
            .into());
        }

        self.insert(&prediction).await.map_err(store_failure)?;
        info!(race = %race, models = %model_versions, "Prediction stored");

        Ok(CacheOutcome {
            prediction,
            reused: false,
        })
    }

    /// Store a correction; it must be strictly newer than the current revision
    pub async fn append_revision(&self, prediction: &Prediction) -> Result<()> {
        let key = (prediction.race.clone(), prediction.model_versions.key());
        let lock = self.key_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            match self.latest(&prediction.race, &prediction.model_versions).await? {
                Some(current) if prediction.generated_at <= current.generated_at => {
                    Err(Error::InvalidInput(format!(
                        "revision for {} at {} is not later than stored revision at {}",
                        prediction.race, prediction.generated_at, current.generated_at
                    )))
                }
                _ => self.insert(prediction).await,
            }
        };
        self.release_key_lock(&key, lock);

        if result.is_ok() {
            info!(race = %prediction.race, generated_at = %prediction.generated_at, "Prediction revision appended");
        }
        result
    }

    async fn insert(&self, prediction: &Prediction) -> Result<()> {
        let race_date = prediction.race.date.format("%Y-%m-%d").to_string();
        let venue = prediction.race.venue.clone();
        let race_number = i64::from(prediction.race.race_number);
        let model_versions = prediction.model_versions.key();
        let generated_at = db_timestamp(&prediction.generated_at);
        let policy = prediction.policy.as_str();
        let schema_version = prediction.feature_schema_version.to_string();
        let payload = serde_json::to_string(prediction)?;
        let stored_at = db_timestamp(&Utc::now());

        retry_on_lock("insert_prediction", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO predictions (
                    race_date, venue, race_number, model_versions, generated_at,
                    policy, feature_schema_version, input_fingerprint, confidence,
                    payload, stored_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&race_date)
            .bind(&venue)
            .bind(race_number)
            .bind(&model_versions)
            .bind(&generated_at)
            .bind(policy)
            .bind(&schema_version)
            .bind(&prediction.input_fingerprint)
            .bind(prediction.confidence)
            .bind(&payload)
            .bind(&stored_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Current revision for a key
    pub async fn latest(
        &self,
        race: &RaceIdentifier,
        model_versions: &ModelVersionSet,
    ) -> Result<Option<Prediction>> {
        let row = sqlx::query(
            r#"
            SELECT payload FROM predictions
            WHERE race_date = ? AND venue = ? AND race_number = ? AND model_versions = ?
            ORDER BY generated_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(race.date.format("%Y-%m-%d").to_string())
        .bind(&race.venue)
        .bind(i64::from(race.race_number))
        .bind(model_versions.key())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| decode(r.get("payload"))).transpose()
    }

    /// Every revision for a key, oldest first
    pub async fn history(
        &self,
        race: &RaceIdentifier,
        model_versions: &ModelVersionSet,
    ) -> Result<Vec<Prediction>> {
        let rows = sqlx::query(
            r#"
            SELECT payload FROM predictions
            WHERE race_date = ? AND venue = ? AND race_number = ? AND model_versions = ?
            ORDER BY generated_at ASC, id ASC
            "#,
        )
        .bind(race.date.format("%Y-%m-%d").to_string())
        .bind(&race.venue)
        .bind(i64::from(race.race_number))
        .bind(model_versions.key())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| decode(r.get("payload"))).collect()
    }

    /// Current revision for every model-version set of a race
    pub async fn for_race(&self, race: &RaceIdentifier) -> Result<Vec<Prediction>> {
        let rows = sqlx::query(
            r#"
            SELECT p.payload FROM predictions p
            WHERE p.race_date = ? AND p.venue = ? AND p.race_number = ?
              AND p.id = (
                SELECT q.id FROM predictions q
                WHERE q.race_date = p.race_date AND q.venue = p.venue
                  AND q.race_number = p.race_number AND q.model_versions = p.model_versions
                ORDER BY q.generated_at DESC, q.id DESC
                LIMIT 1
              )
            ORDER BY p.model_versions
            "#,
        )
        .bind(race.date.format("%Y-%m-%d").to_string())
        .bind(&race.venue)
        .bind(i64::from(race.race_number))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| decode(r.get("payload"))).collect()
    }

    /// Current revisions for races dated `from..=to`
    pub async fn between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Prediction>> {
        if from > to {
            return Err(Error::InvalidInput(format!(
                "empty date range: {} is after {}",
                from, to
            )));
        }

        let rows = sqlx::query(
            r#"
            SELECT p.payload FROM predictions p
            WHERE p.race_date BETWEEN ? AND ?
              AND p.id = (
                SELECT q.id FROM predictions q
                WHERE q.race_date = p.race_date AND q.venue = p.venue
                  AND q.race_number = p.race_number AND q.model_versions = p.model_versions
                ORDER BY q.generated_at DESC, q.id DESC
                LIMIT 1
              )
            ORDER BY p.race_date, p.venue, p.race_number, p.model_versions
            "#,
        )
        .bind(from.format("%Y-%m-%d").to_string())
        .bind(to.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| decode(r.get("payload"))).collect()
    }
}

fn decode(payload: String) -> Result<Prediction> {
    Ok(serde_json::from_str(&payload)?)
}

fn store_failure(err: Error) -> StageFailure {
    StoreFailure::from(err).into()
}
