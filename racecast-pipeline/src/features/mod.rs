//! Feature building
//!
//! Pure transformation from a parsed card plus histories to one fixed-width
//! vector per entry. Optional inputs that are absent become
//! [`MISSING_FEATURE`]; only the inputs every feature depends on (race
//! distance, horse id, post position) can fail a race here.

pub mod schema;

use racecast_common::config::FeatureConfig;
use racecast_common::{Error, Result};
use tracing::debug;

use crate::models::{FeatureSchemaVersion, FeatureVector, HistoryIndex, RaceCard, MISSING_FEATURE};
use crate::parse::attach_histories;
use crate::types::FeatureFailure;
pub use schema::{schema_for_version, FeatureSchema, SchemaV1};

pub struct FeatureBuilder {
    schema: Box<dyn FeatureSchema>,
}

impl FeatureBuilder {
    pub fn new(schema: Box<dyn FeatureSchema>) -> Self {
        Self { schema }
    }

    /// Builder for the configured schema version
    pub fn from_config(config: &FeatureConfig) -> Result<Self> {
        schema_for_version(&config.schema_version, config.recent_form_window)
            .map(Self::new)
            .ok_or_else(|| {
                Error::Config(format!(
                    "Unknown feature schema version: {}",
                    config.schema_version
                ))
            })
    }

    pub fn schema_version(&self) -> FeatureSchemaVersion {
        self.schema.version()
    }

    pub fn feature_names(&self) -> &'static [&'static str] {
        self.schema.names()
    }

    /// One vector per entry, in post-position order
    pub fn build(
        &self,
        card: &RaceCard,
        histories: &HistoryIndex,
    ) -> std::result::Result<Vec<FeatureVector>, FeatureFailure> {
        let card = attach_histories(card.clone(), histories);
        let version = self.schema.version();
        let names = self.schema.names();

        let mut vectors = Vec::with_capacity(card.entries.len());
        for entry in &card.entries {
            let mut missing_inputs = Vec::new();
            if card.distance_m.is_none() {
                missing_inputs.push("race distance".to_string());
            }
            if entry.horse_id.trim().is_empty() {
                missing_inputs.push("horse id".to_string());
            }
            if entry.post_position == 0 {
                missing_inputs.push("post position".to_string());
            }
            if !missing_inputs.is_empty() {
                return Err(FeatureFailure {
                    entry: entry_label(entry.horse_id.as_str(), entry.post_position),
                    missing_inputs,
                });
            }

            let mut values = self.schema.compute(&card, entry);
            // Width never varies: anything the schema did not emit is unknown
            for name in names {
                values.entry(name.to_string()).or_insert(MISSING_FEATURE);
            }
            values.retain(|name, _| names.contains(&name.as_str()));

            vectors.push(FeatureVector {
                horse_id: entry.horse_id.clone(),
                post_position: entry.post_position,
                schema_version: version.clone(),
                values,
            });
        }

        debug!(
            race = %card.race,
            entries = vectors.len(),
            schema = %version,
            "Built feature vectors"
        );
        Ok(vectors)
    }
}

fn entry_label(horse_id: &str, post_position: u8) -> String {
    if horse_id.trim().is_empty() {
        format!("post {}", post_position)
    } else {
        format!("{} (post {})", horse_id, post_position)
    }
}
