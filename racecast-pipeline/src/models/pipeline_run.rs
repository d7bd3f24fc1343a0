//! Per-race pipeline state machine
//!
//! Pending → Fetching → Parsing → FeatureBuilding → Scoring → Cached → Done,
//! with Failed reachable from every non-terminal stage. A stored prediction
//! being reused short-circuits Pending → Cached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use super::race::RaceIdentifier;

/// Where a failed run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePoint {
    Fetching,
    Parsing,
    FeatureBuilding,
    Scoring,
    Caching,
    /// Trigger deadline elapsed before the run finished
    Timeout,
    /// Worker ended without reporting an outcome
    Aborted,
}

impl FailurePoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePoint::Fetching => "fetching",
            FailurePoint::Parsing => "parsing",
            FailurePoint::FeatureBuilding => "feature_building",
            FailurePoint::Scoring => "scoring",
            FailurePoint::Caching => "caching",
            FailurePoint::Timeout => "timeout",
            FailurePoint::Aborted => "aborted",
        }
    }
}

impl fmt::Display for FailurePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage of one race run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Pending,
    Fetching,
    Parsing,
    FeatureBuilding,
    Scoring,
    /// Prediction persisted (or found already persisted)
    Cached,
    Done,
    Failed(FailurePoint),
}

impl PipelineStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Failed(_))
    }

    /// Whether `self → next` is a legal edge
    pub fn can_transition_to(&self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (_, Failed(_)) => true,
            (Pending, Fetching)
            | (Pending, Cached)
            | (Fetching, Parsing)
            | (Parsing, FeatureBuilding)
            | (FeatureBuilding, Scoring)
            | (Scoring, Cached)
            | (Cached, Done) => true,
            _ => false,
        }
    }

    /// Failure point corresponding to a failure while in this stage
    pub fn failure_point(&self) -> FailurePoint {
        match self {
            PipelineStage::Pending | PipelineStage::Fetching => FailurePoint::Fetching,
            PipelineStage::Parsing => FailurePoint::Parsing,
            PipelineStage::FeatureBuilding => FailurePoint::FeatureBuilding,
            PipelineStage::Scoring => FailurePoint::Scoring,
            PipelineStage::Cached | PipelineStage::Done => FailurePoint::Caching,
            PipelineStage::Failed(point) => *point,
        }
    }

    /// Text form used in the database and on the event bus
    pub fn label(&self) -> String {
        match self {
            PipelineStage::Pending => "pending".to_string(),
            PipelineStage::Fetching => "fetching".to_string(),
            PipelineStage::Parsing => "parsing".to_string(),
            PipelineStage::FeatureBuilding => "feature_building".to_string(),
            PipelineStage::Scoring => "scoring".to_string(),
            PipelineStage::Cached => "cached".to_string(),
            PipelineStage::Done => "done".to_string(),
            PipelineStage::Failed(point) => format!("failed:{}", point),
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Terminal outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Pending,
    Success,
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Pending => "pending",
            RunOutcome::Success => "success",
            RunOutcome::Failed => "failed",
        }
    }
}

/// Rejected state change
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid transition for run {run_id}: {from} -> {to}")]
pub struct InvalidTransition {
    pub run_id: Uuid,
    pub from: PipelineStage,
    pub to: PipelineStage,
}

/// Recorded stage change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransition {
    pub run_id: Uuid,
    pub old_stage: PipelineStage,
    pub new_stage: PipelineStage,
    pub transitioned_at: DateTime<Utc>,
}

/// Observability record for one race within one trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub trigger_id: Uuid,
    pub race: RaceIdentifier,
    pub stage: PipelineStage,
    /// Stage label → attempts made in that stage
    pub attempts: BTreeMap<String, u32>,
    pub outcome: RunOutcome,
    pub error: Option<String>,
    /// True when an already stored prediction was returned
    pub reused: bool,
    pub transitions: Vec<StageTransition>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(trigger_id: Uuid, race: RaceIdentifier) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            trigger_id,
            race,
            stage: PipelineStage::Pending,
            attempts: BTreeMap::new(),
            outcome: RunOutcome::Pending,
            error: None,
            reused: false,
            transitions: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Move to `new_stage`, rejecting edges the state machine does not allow
    pub fn transition_to(
        &mut self,
        new_stage: PipelineStage,
    ) -> Result<StageTransition, InvalidTransition> {
        if !self.stage.can_transition_to(new_stage) {
            return Err(InvalidTransition {
                run_id: self.run_id,
                from: self.stage,
                to: new_stage,
            });
        }

        let transition = StageTransition {
            run_id: self.run_id,
            old_stage: self.stage,
            new_stage,
            transitioned_at: Utc::now(),
        };
        self.stage = new_stage;
        self.transitions.push(transition.clone());

        match new_stage {
            PipelineStage::Done => {
                self.outcome = RunOutcome::Success;
                self.ended_at = Some(transition.transitioned_at);
            }
            PipelineStage::Failed(_) => {
                self.outcome = RunOutcome::Failed;
                self.ended_at = Some(transition.transitioned_at);
            }
            PipelineStage::Fetching
            | PipelineStage::Parsing
            | PipelineStage::FeatureBuilding
            | PipelineStage::Scoring => {
                *self.attempts.entry(new_stage.label()).or_insert(0) += 1;
            }
            _ => {}
        }

        Ok(transition)
    }

    /// Fail from the current stage, recording the reason
    pub fn fail(
        &mut self,
        point: FailurePoint,
        reason: impl Into<String>,
    ) -> Result<StageTransition, InvalidTransition> {
        let transition = self.transition_to(PipelineStage::Failed(point))?;
        self.error = Some(reason.into());
        Ok(transition)
    }

    /// Fetch attempts happen inside the fetcher; fold them into the stage count
    pub fn record_attempts(&mut self, stage: PipelineStage, attempts: u32) {
        let slot = self.attempts.entry(stage.label()).or_insert(0);
        *slot = (*slot).max(attempts);
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn run() -> PipelineRun {
        let race = RaceIdentifier::new(NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(), "TOKYO", 1);
        PipelineRun::new(Uuid::new_v4(), race)
    }

    #[test]
    fn test_happy_path_reaches_done() {
        let mut run = run();
        for stage in [
            PipelineStage::Fetching,
            PipelineStage::Parsing,
            PipelineStage::FeatureBuilding,
            PipelineStage::Scoring,
            PipelineStage::Cached,
            PipelineStage::Done,
        ] {
            run.transition_to(stage).unwrap();
        }

        assert!(run.is_terminal());
        assert_eq!(run.outcome, RunOutcome::Success);
        assert_eq!(run.transitions.len(), 6);
        assert_eq!(run.attempts.get("fetching"), Some(&1));
        assert!(run.ended_at.is_some());
    }

    #[test]
    fn test_skipping_a_stage_is_rejected() {
        let mut run = run();
        run.transition_to(PipelineStage::Fetching).unwrap();

        let err = run.transition_to(PipelineStage::Scoring).unwrap_err();
        assert_eq!(err.from, PipelineStage::Fetching);
        assert_eq!(run.stage, PipelineStage::Fetching);
    }

    #[test]
    fn test_terminal_stage_is_final() {
        let mut run = run();
        run.transition_to(PipelineStage::Fetching).unwrap();
        run.fail(FailurePoint::Fetching, "connection refused").unwrap();

        assert_eq!(run.outcome, RunOutcome::Failed);
        assert_eq!(run.error.as_deref(), Some("connection refused"));
        assert!(run.transition_to(PipelineStage::Parsing).is_err());
        assert!(run.fail(FailurePoint::Timeout, "late").is_err());
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(PipelineStage::FeatureBuilding.label(), "feature_building");
        assert_eq!(
            PipelineStage::Failed(FailurePoint::Timeout).label(),
            "failed:timeout"
        );
        assert_eq!(PipelineStage::Scoring.failure_point(), FailurePoint::Scoring);
    }

    #[test]
    fn test_record_attempts_keeps_maximum() {
        let mut run = run();
        run.transition_to(PipelineStage::Fetching).unwrap();
        run.record_attempts(PipelineStage::Fetching, 3);
        run.record_attempts(PipelineStage::Fetching, 2);
        assert_eq!(run.attempts.get("fetching"), Some(&3));
    }
}
