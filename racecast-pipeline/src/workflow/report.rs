//! Batch report for one trigger
//!
//! Every discovered race appears exactly once, either with its prediction or
//! with the failure that made it unavailable.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use uuid::Uuid;

use crate::models::{PipelineRun, Prediction, RaceIdentifier};
use crate::types::StageFailure;

/// Picks listed per race in the delivery text
pub const SUMMARY_TOP_PICKS: usize = 3;

/// Final result of one race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RaceResult {
    Predicted { prediction: Prediction },
    Unavailable { failure: StageFailure },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceOutcome {
    pub race: RaceIdentifier,
    /// Run record as it stood when the race reached a terminal stage
    pub run: PipelineRun,
    pub result: RaceResult,
    /// True when a stored prediction was returned instead of computed
    pub reused: bool,
}

impl RaceOutcome {
    pub fn prediction(&self) -> Option<&Prediction> {
        match &self.result {
            RaceResult::Predicted { prediction } => Some(prediction),
            RaceResult::Unavailable { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        match &self.result {
            RaceResult::Predicted { .. } => None,
            RaceResult::Unavailable { failure } => Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.prediction().is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub trigger_id: Uuid,
    pub race_date: NaiveDate,
    pub issued_at: DateTime<Utc>,
    /// Set when the race list itself could not be obtained
    pub discovery_failure: Option<StageFailure>,
    /// Sorted by race identifier
    pub outcomes: Vec<RaceOutcome>,
}

impl BatchReport {
    pub fn new(
        trigger_id: Uuid,
        race_date: NaiveDate,
        issued_at: DateTime<Utc>,
        mut outcomes: Vec<RaceOutcome>,
    ) -> Self {
        outcomes.sort_by(|a, b| a.race.cmp(&b.race));
        Self {
            trigger_id,
            race_date,
            issued_at,
            discovery_failure: None,
            outcomes,
        }
    }

    pub fn discovery_failed(
        trigger_id: Uuid,
        race_date: NaiveDate,
        issued_at: DateTime<Utc>,
        failure: StageFailure,
    ) -> Self {
        Self {
            trigger_id,
            race_date,
            issued_at,
            discovery_failure: Some(failure),
            outcomes: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn predictions(&self) -> impl Iterator<Item = &Prediction> {
        self.outcomes.iter().filter_map(RaceOutcome::prediction)
    }

    pub fn outcome_for(&self, race: &RaceIdentifier) -> Option<&RaceOutcome> {
        self.outcomes.iter().find(|o| &o.race == race)
    }

    /// Delivery text: a header, then one line per race in race order
    pub fn render_summary(&self) -> String {
        let mut out = String::new();

        if let Some(failure) = &self.discovery_failure {
            let _ = writeln!(out, "no races discovered for {}: {}", self.race_date, failure);
            return out;
        }

        let _ = writeln!(
            out,
            "Predictions for {}: {} of {} races available",
            self.race_date,
            self.succeeded(),
            self.outcomes.len()
        );

        for outcome in &self.outcomes {
            match &outcome.result {
                RaceResult::Predicted { prediction } => {
                    let picks: Vec<String> = prediction
                        .top(SUMMARY_TOP_PICKS)
                        .iter()
                        .map(|e| format!("{}. {} (#{})", e.rank, e.horse_name, e.post_position))
                        .collect();
                    let _ = writeln!(
                        out,
                        "{} R{}: {} [confidence {:.2}]",
                        outcome.race.venue,
                        outcome.race.race_number,
                        picks.join(", "),
                        prediction.confidence
                    );
                }
                RaceResult::Unavailable { failure } => {
                    let _ = writeln!(
                        out,
                        "prediction unavailable for race {}: {}",
                        outcome.race, failure
                    );
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailurePoint, FeatureSchemaVersion, ModelVersionSet, RankedEntry};
    use crate::types::FeatureFailure;
    use chrono::TimeZone;
    use racecast_common::config::CombinationPolicy;
    use std::collections::BTreeMap;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    fn issued() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 1, 0, 0).unwrap()
    }

    fn race(n: u8) -> RaceIdentifier {
        RaceIdentifier::new(day(), "TOKYO", n)
    }

    fn predicted(n: u8) -> RaceOutcome {
        let names = ["Alpha", "Bravo", "Charlie", "Delta"];
        let ranking = names
            .iter()
            .enumerate()
            .map(|(i, name)| RankedEntry {
                rank: i as u32 + 1,
                post_position: i as u8 + 1,
                horse_id: format!("H{}", i + 1),
                horse_name: name.to_string(),
                final_score: 0.9 - i as f64 * 0.1,
                model_scores: BTreeMap::new(),
            })
            .collect();
        let prediction = Prediction {
            race: race(n),
            model_versions: ModelVersionSet::new(),
            policy: CombinationPolicy::WeightedAverage,
            feature_schema_version: FeatureSchemaVersion::new("v1"),
            ranking,
            confidence: 0.756,
            generated_at: issued(),
            input_fingerprint: String::new(),
        };
        let mut run = PipelineRun::new(Uuid::nil(), race(n));
        run.transition_to(crate::models::PipelineStage::Cached).unwrap();
        run.transition_to(crate::models::PipelineStage::Done).unwrap();
        RaceOutcome {
            race: race(n),
            run,
            result: RaceResult::Predicted { prediction },
            reused: true,
        }
    }

    fn unavailable(n: u8) -> RaceOutcome {
        let mut run = PipelineRun::new(Uuid::nil(), race(n));
        run.fail(FailurePoint::FeatureBuilding, "missing distance").unwrap();
        RaceOutcome {
            race: race(n),
            run,
            result: RaceResult::Unavailable {
                failure: FeatureFailure {
                    entry: "H2 (post 2)".to_string(),
                    missing_inputs: vec!["race distance".to_string()],
                }
                .into(),
            },
            reused: false,
        }
    }

    #[test]
    fn test_outcomes_sorted_and_counted() {
        let report = BatchReport::new(
            Uuid::nil(),
            day(),
            issued(),
            vec![predicted(2), unavailable(3), predicted(1)],
        );

        let order: Vec<u8> = report.outcomes.iter().map(|o| o.race.race_number).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.predictions().count(), 2);
        assert!(report.outcome_for(&race(3)).unwrap().failure().is_some());
    }

    #[test]
    fn test_summary_names_every_race() {
        let report = BatchReport::new(
            Uuid::nil(),
            day(),
            issued(),
            vec![predicted(1), unavailable(3)],
        );
        let summary = report.render_summary();
        let lines: Vec<&str> = summary.lines().collect();

        assert_eq!(lines[0], "Predictions for 2026-10-18: 1 of 2 races available");
        assert_eq!(
            lines[1],
            "TOKYO R1: 1. Alpha (#1), 2. Bravo (#2), 3. Charlie (#3) [confidence 0.76]"
        );
        assert_eq!(
            lines[2],
            "prediction unavailable for race 2026-10-18/TOKYO/R3: \
             entry H2 (post 2) is missing required inputs: race distance"
        );
    }

    #[test]
    fn test_discovery_failure_summary() {
        let failure: StageFailure = crate::types::FetchFailure {
            reason: "HTTP 503".to_string(),
            url: "http://source/cards/2026-10-18".to_string(),
            attempts: 3,
        }
        .into();
        let report = BatchReport::discovery_failed(Uuid::nil(), day(), issued(), failure);

        assert_eq!(report.succeeded(), 0);
        assert!(report
            .render_summary()
            .starts_with("no races discovered for 2026-10-18: fetch of"));
    }

    #[test]
    fn test_result_serializes_with_status_tag() {
        let json = serde_json::to_value(&unavailable(3).result).unwrap();
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["failure"]["kind"], "feature");
    }
}
