//! Race-scoped failure taxonomy
//!
//! Every stage reports its own failure type; the orchestrator folds them into
//! [`StageFailure`] on the race outcome so one race failing never hides
//! another's result.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::models::{FailurePoint, RaceIdentifier};

/// Maximum characters of a document quoted in a parse failure
pub const SNIPPET_MAX_CHARS: usize = 120;

// ============================================================================
// Fetch
// ============================================================================

/// Reason recorded when the trigger token fired mid-fetch
pub const CANCELLED_REASON: &str = "cancelled";

/// Retrieval failed after retries, permanently, or by cancellation
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("fetch of {url} failed after {attempts} attempt(s): {reason}")]
pub struct FetchFailure {
    pub reason: String,
    pub url: String,
    pub attempts: u32,
}

impl FetchFailure {
    pub fn cancelled(url: impl Into<String>, attempts: u32) -> Self {
        Self {
            reason: CANCELLED_REASON.to_string(),
            url: url.into(),
            attempts,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason == CANCELLED_REASON
    }
}

// ============================================================================
// Parse
// ============================================================================

/// Which parser rejected a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStage {
    CardIndex,
    RaceCard,
    HorseHistory,
    JockeyHistory,
    QualityGate,
}

impl fmt::Display for ParseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParseStage::CardIndex => "card_index",
            ParseStage::RaceCard => "race_card",
            ParseStage::HorseHistory => "horse_history",
            ParseStage::JockeyHistory => "jockey_history",
            ParseStage::QualityGate => "quality_gate",
        };
        f.write_str(s)
    }
}

/// Document did not match any known layout
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("{stage} parse failed: {message} (near: {offending_snippet:?})")]
pub struct ParseFailure {
    pub stage: ParseStage,
    pub message: String,
    /// Bounded excerpt of the offending document
    pub offending_snippet: String,
}

impl ParseFailure {
    pub fn new(stage: ParseStage, message: impl Into<String>, document: &[u8]) -> Self {
        Self {
            stage,
            message: message.into(),
            offending_snippet: snippet(document),
        }
    }
}

/// First [`SNIPPET_MAX_CHARS`] characters of a document, lossily decoded
pub fn snippet(document: &[u8]) -> String {
    String::from_utf8_lossy(document)
        .chars()
        .take(SNIPPET_MAX_CHARS)
        .collect()
}

// ============================================================================
// Features / ensemble
// ============================================================================

/// A required feature input was absent
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("entry {entry} is missing required inputs: {}", missing_inputs.join(", "))]
pub struct FeatureFailure {
    pub entry: String,
    pub missing_inputs: Vec<String>,
}

/// No usable ensemble output for the race
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("ensemble failed for {race}: {}", model_errors.join("; "))]
pub struct EnsembleFailure {
    pub race: RaceIdentifier,
    pub model_errors: Vec<String>,
}

/// Trigger deadline elapsed before the race finished
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("timed out after {}s in stage {stage}", timeout.as_secs())]
pub struct TimeoutFailure {
    pub timeout: Duration,
    /// Stage label the run was in when the deadline fired
    pub stage: String,
}

/// Prediction could not be persisted or read back
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("store error: {message}")]
pub struct StoreFailure {
    pub message: String,
}

impl From<racecast_common::Error> for StoreFailure {
    fn from(err: racecast_common::Error) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

/// Worker task ended without reporting (panic or abort)
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("worker ended without a result: {message}")]
pub struct WorkerFailure {
    pub message: String,
}

// ============================================================================
// Unified
// ============================================================================

/// Failure attached to a race outcome
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageFailure {
    #[error(transparent)]
    Fetch(#[from] FetchFailure),
    #[error(transparent)]
    Parse(#[from] ParseFailure),
    #[error(transparent)]
    Feature(#[from] FeatureFailure),
    #[error(transparent)]
    Ensemble(#[from] EnsembleFailure),
    #[error(transparent)]
    Timeout(#[from] TimeoutFailure),
    #[error(transparent)]
    Store(#[from] StoreFailure),
    #[error(transparent)]
    Worker(#[from] WorkerFailure),
}

impl StageFailure {
    /// Stage recorded on the failed run
    pub fn failure_point(&self) -> FailurePoint {
        match self {
            StageFailure::Fetch(f) if f.is_cancelled() => FailurePoint::Timeout,
            StageFailure::Fetch(_) => FailurePoint::Fetching,
            StageFailure::Parse(_) => FailurePoint::Parsing,
            StageFailure::Feature(_) => FailurePoint::FeatureBuilding,
            StageFailure::Ensemble(_) => FailurePoint::Scoring,
            StageFailure::Timeout(_) => FailurePoint::Timeout,
            StageFailure::Store(_) => FailurePoint::Caching,
            StageFailure::Worker(_) => FailurePoint::Aborted,
        }
    }
}
