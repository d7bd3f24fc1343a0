//! Pipeline domain types

pub mod features;
pub mod history;
pub mod pipeline_run;
pub mod prediction;
pub mod race;
pub mod trigger;

pub use features::{FeatureSchemaVersion, FeatureVector, MISSING_FEATURE};
pub use history::{EntryHistory, HistoryIndex, HorseHistory, JockeyHistory, PastStart};
pub use pipeline_run::{
    FailurePoint, InvalidTransition, PipelineRun, PipelineStage, RunOutcome, StageTransition,
};
pub use prediction::{ModelScore, ModelVersionSet, Prediction, RankedEntry};
pub use race::{normalize_venue, CardQuality, Entry, RaceCard, RaceIdentifier, Surface};
pub use trigger::{TriggerEvent, TriggerSource};
