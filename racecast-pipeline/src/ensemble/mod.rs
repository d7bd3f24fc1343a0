//! Model ensemble
//!
//! Scores every entry with every member, combines the member scores under the
//! configured policy, and ranks entries without ties. The ensemble only sees
//! members through [`ScoringModel`]; it never knows concrete model types.
//!
//! Combination policies:
//! - weighted-average: Σ wₘ·sₘ / Σ wₘ over the members that scored the entry
//! - rank-aggregate: weighted Borda count; a member ranking k entries gives
//!   (k − rank)/(k − 1) points (1.0 when k = 1), normalised by Σ wₘ
//!
//! Ties on the combined score fall to the highest-weighted member's raw score,
//! then to the lower post position.

pub mod catalogue;
pub mod model;

use chrono::{DateTime, Utc};
use racecast_common::config::CombinationPolicy;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::{
    FeatureSchemaVersion, FeatureVector, ModelVersionSet, Prediction, RaceCard, RankedEntry,
};
use crate::types::EnsembleFailure;
pub use catalogue::ensemble_from_config;
pub use model::{LinearModel, ModelError, ScoringModel};

/// Variance scale in the confidence formula
const DISAGREEMENT_PENALTY: f64 = 10.0;

struct Member {
    model: Arc<dyn ScoringModel>,
    weight: f64,
}

pub struct Ensemble {
    members: Vec<Member>,
    policy: CombinationPolicy,
}

/// Per-race score table: `scores[member][entry]`
struct ScoreTable {
    scores: Vec<Vec<Option<f64>>>,
    errors: Vec<String>,
}

impl Ensemble {
    pub fn new(policy: CombinationPolicy) -> Self {
        Self {
            members: Vec::new(),
            policy,
        }
    }

    /// Add a member; non-positive or non-finite weights are clamped out
    pub fn add_member(&mut self, model: Arc<dyn ScoringModel>, weight: f64) {
        if !weight.is_finite() || weight <= 0.0 {
            warn!(model = model.id(), weight, "Ignoring member with non-positive weight");
            return;
        }
        self.members.push(Member { model, weight });
    }

    pub fn with_member(mut self, model: Arc<dyn ScoringModel>, weight: f64) -> Self {
        self.add_member(model, weight);
        self
    }

    pub fn policy(&self) -> CombinationPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn weight_of(&self, model_id: &str) -> Option<f64> {
        self.members
            .iter()
            .find(|m| m.model.id() == model_id)
            .map(|m| m.weight)
    }

    /// `id@version` of every member; part of the prediction cache key
    pub fn model_versions(&self) -> ModelVersionSet {
        let mut set = ModelVersionSet::new();
        for member in &self.members {
            set.insert(member.model.id(), member.model.version());
        }
        set
    }

    /// Index of the member that breaks ties: highest weight, then lowest id
    fn tie_break_member(&self) -> Option<usize> {
        self.members
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.weight
                    .total_cmp(&b.weight)
                    .then_with(|| b.model.id().cmp(a.model.id()))
            })
            .map(|(i, _)| i)
    }

    fn score_all(&self, vectors: &[FeatureVector]) -> ScoreTable {
        let mut table = ScoreTable {
            scores: Vec::with_capacity(self.members.len()),
            errors: Vec::new(),
        };

        for member in &self.members {
            let row = vectors
                .iter()
                .map(|vector| match member.model.score(vector) {
                    Ok(s) if (0.0..=1.0).contains(&s.score) => Some(s.score),
                    Ok(s) => {
                        table.errors.push(format!(
                            "{}: score {} out of range for post {}",
                            member.model.id(),
                            s.score,
                            vector.post_position
                        ));
                        None
                    }
                    Err(e) => {
                        debug!(model = member.model.id(), post = vector.post_position, error = %e, "Model skipped entry");
                        table
                            .errors
                            .push(format!("{} (post {})", e, vector.post_position));
                        None
                    }
                })
                .collect();
            table.scores.push(row);
        }
        table
    }

    fn combine(&self, table: &ScoreTable, entries: usize) -> Vec<f64> {
        let points: Vec<Vec<Option<f64>>> = match self.policy {
            CombinationPolicy::WeightedAverage => table.scores.clone(),
            CombinationPolicy::RankAggregate => table
                .scores
                .iter()
                .map(|row| borda_points(row))
                .collect(),
        };

        (0..entries)
            .map(|e| {
                let (weighted, total_weight) = self.members.iter().zip(&points).fold(
                    (0.0, 0.0),
                    |(sum, weights), (member, row)| match row[e] {
                        Some(p) => (sum + member.weight * p, weights + member.weight),
                        None => (sum, weights),
                    },
                );
                if total_weight > 0.0 {
                    weighted / total_weight
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Score, combine and rank one race
    ///
    /// `vectors` must be in the card's entry order. `generated_at` comes from
    /// the trigger so identical inputs give identical output.
    pub fn predict(
        &self,
        card: &RaceCard,
        vectors: &[FeatureVector],
        schema_version: &FeatureSchemaVersion,
        generated_at: DateTime<Utc>,
    ) -> Result<Prediction, EnsembleFailure> {
        let failure = |model_errors: Vec<String>| EnsembleFailure {
            race: card.race.clone(),
            model_errors,
        };

        if self.members.is_empty() {
            return Err(failure(vec!["no models configured".to_string()]));
        }
        if vectors.len() != card.entries.len() {
            return Err(failure(vec![format!(
                "{} feature vectors for {} entries",
                vectors.len(),
                card.entries.len()
            )]));
        }

        let table = self.score_all(vectors);
        let entries = vectors.len();

        let successes: usize = table.scores.iter().flatten().filter(|s| s.is_some()).count();
        if successes == 0 {
            return Err(failure(table.errors));
        }
        let unscored: Vec<u8> = (0..entries)
            .filter(|e| table.scores.iter().all(|row| row[*e].is_none()))
            .map(|e| vectors[e].post_position)
            .collect();
        if !unscored.is_empty() {
            let mut errors = table.errors;
            errors.push(format!("no model scored post(s) {:?}", unscored));
            return Err(failure(errors));
        }

        let combined = self.combine(&table, entries);
        let tie_member = self.tie_break_member();

        let mut order: Vec<usize> = (0..entries).collect();
        order.sort_by(|&a, &b| {
            combined[b]
                .total_cmp(&combined[a])
                .then_with(|| match tie_member {
                    Some(m) => cmp_missing_last(table.scores[m][a], table.scores[m][b]),
                    None => Ordering::Equal,
                })
                .then_with(|| vectors[a].post_position.cmp(&vectors[b].post_position))
        });

        let ranking: Vec<RankedEntry> = order
            .iter()
            .enumerate()
            .map(|(position, &e)| {
                let entry = &card.entries[e];
                let model_scores: BTreeMap<String, f64> = self
                    .members
                    .iter()
                    .zip(&table.scores)
                    .filter_map(|(member, row)| row[e].map(|s| (member.model.id().to_string(), s)))
                    .collect();
                RankedEntry {
                    rank: position as u32 + 1,
                    post_position: vectors[e].post_position,
                    horse_id: entry.horse_id.clone(),
                    horse_name: entry.horse_name.clone(),
                    final_score: combined[e],
                    model_scores,
                }
            })
            .collect();

        let confidence = self.confidence(&table, successes, entries);
        let model_versions = self.model_versions();
        let input_fingerprint =
            self.fingerprint(card, vectors, &model_versions, schema_version)
                .map_err(|e| failure(vec![format!("fingerprint: {}", e)]))?;

        debug!(
            race = %card.race,
            policy = self.policy.as_str(),
            confidence,
            scored = successes,
            "Ensemble prediction ready"
        );

        Ok(Prediction {
            race: card.race.clone(),
            model_versions,
            policy: self.policy,
            feature_schema_version: schema_version.clone(),
            ranking,
            confidence,
            generated_at,
            input_fingerprint,
        })
    }

    /// coverage / (1 + 10 · mean per-entry variance), clamped to [0, 1]
    fn confidence(&self, table: &ScoreTable, successes: usize, entries: usize) -> f64 {
        let coverage = successes as f64 / (self.members.len() * entries) as f64;

        let variances: Vec<f64> = (0..entries)
            .map(|e| {
                let scores: Vec<f64> = table.scores.iter().filter_map(|row| row[e]).collect();
                let n = scores.len() as f64;
                let mean = scores.iter().sum::<f64>() / n;
                scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n
            })
            .collect();
        let mean_variance = variances.iter().sum::<f64>() / entries as f64;

        (coverage / (1.0 + DISAGREEMENT_PENALTY * mean_variance)).clamp(0.0, 1.0)
    }

    fn fingerprint(
        &self,
        card: &RaceCard,
        vectors: &[FeatureVector],
        model_versions: &ModelVersionSet,
        schema_version: &FeatureSchemaVersion,
    ) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Inputs<'a> {
            race: &'a crate::models::RaceIdentifier,
            model_versions: &'a ModelVersionSet,
            policy: CombinationPolicy,
            weights: BTreeMap<&'a str, f64>,
            schema_version: &'a FeatureSchemaVersion,
            vectors: &'a [FeatureVector],
        }

        let inputs = Inputs {
            race: &card.race,
            model_versions,
            policy: self.policy,
            weights: self
                .members
                .iter()
                .map(|m| (m.model.id(), m.weight))
                .collect(),
            schema_version,
            vectors,
        };
        let bytes = serde_json::to_vec(&inputs)?;
        Ok(format!("{:x}", Sha256::digest(&bytes)))
    }
}

/// Borda points for the entries one member scored
fn borda_points(row: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut scored: Vec<(usize, f64)> = row
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.map(|s| (i, s)))
        .collect();
    // Equal raw scores keep entry order, which is post-position order
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let k = scored.len();
    let mut points = vec![None; row.len()];
    for (position, (i, _)) in scored.into_iter().enumerate() {
        let rank = position + 1;
        points[i] = Some(if k == 1 {
            1.0
        } else {
            (k - rank) as f64 / (k - 1) as f64
        });
    }
    points
}

/// Descending by score; a missing score sorts after any present one
fn cmp_missing_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
