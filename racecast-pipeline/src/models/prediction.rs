//! Model scores and the prediction artifact

use chrono::{DateTime, Utc};
use racecast_common::config::CombinationPolicy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::features::FeatureSchemaVersion;
use super::race::RaceIdentifier;

/// One ensemble member's score for one entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelScore {
    pub model_id: String,
    pub model_version: String,
    pub post_position: u8,
    /// Win probability or normalized score in [0, 1]
    pub score: f64,
    /// Model-reported confidence in [0, 1]
    pub confidence: f64,
}

/// Set of `id@version` strings identifying the models behind a prediction
///
/// Part of the cache key: the same race scored by a different model set is a
/// different artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelVersionSet(BTreeSet<String>);

impl ModelVersionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model_id: &str, version: &str) {
        self.0.insert(format!("{}@{}", model_id, version));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Stable storage key (`a@1,b@2`, sorted)
    pub fn key(&self) -> String {
        self.0.iter().cloned().collect::<Vec<_>>().join(",")
    }

    pub fn from_key(key: &str) -> Self {
        Self(
            key.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

impl fmt::Display for ModelVersionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// An entry's place in the final ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    /// 1-based, unique within the prediction
    pub rank: u32,
    pub post_position: u8,
    pub horse_id: String,
    pub horse_name: String,
    pub final_score: f64,
    /// Raw score of every member that scored this entry
    pub model_scores: BTreeMap<String, f64>,
}

/// Ranked prediction for one race; immutable once stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub race: RaceIdentifier,
    pub model_versions: ModelVersionSet,
    pub policy: CombinationPolicy,
    pub feature_schema_version: FeatureSchemaVersion,
    /// Ordered by rank
    pub ranking: Vec<RankedEntry>,
    /// Inter-model agreement in [0, 1]
    pub confidence: f64,
    pub generated_at: DateTime<Utc>,
    /// SHA-256 over the canonical scoring inputs
    pub input_fingerprint: String,
}

impl Prediction {
    /// Canonical serialized form; equal inputs produce equal bytes
    pub fn to_canonical_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn top(&self, n: usize) -> &[RankedEntry] {
        &self.ranking[..n.min(self.ranking.len())]
    }

    /// True when ranks are exactly 1..=N in order
    pub fn ranks_are_permutation(&self) -> bool {
        let mut ranks: Vec<u32> = self.ranking.iter().map(|r| r.rank).collect();
        ranks.sort_unstable();
        ranks
            .iter()
            .enumerate()
            .all(|(i, rank)| *rank as usize == i + 1)
    }
}
