//! Trigger events
//!
//! The scheduler (or an operator) hands the orchestrator an explicit trigger
//! value; the pipeline keeps no timer state of its own.

use chrono::{DateTime, NaiveDate, Utc};
use racecast_common::time::race_date_at;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a trigger came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Scheduled,
    Manual,
}

/// One pipeline run request for a race date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub trigger_id: Uuid,
    pub race_date: NaiveDate,
    /// Used as the generation timestamp of predictions computed by this trigger
    pub issued_at: DateTime<Utc>,
    pub source: TriggerSource,
    /// Recompute and append a new revision even if a prediction is stored
    pub force: bool,
}

impl TriggerEvent {
    pub fn new(race_date: NaiveDate, issued_at: DateTime<Utc>, source: TriggerSource) -> Self {
        Self {
            trigger_id: Uuid::new_v4(),
            race_date,
            issued_at,
            source,
            force: false,
        }
    }

    /// Scheduled trigger for "today" in the race calendar's fixed offset
    pub fn scheduled_today(
        issued_at: DateTime<Utc>,
        utc_offset_hours: i32,
    ) -> racecast_common::Result<Self> {
        let race_date = race_date_at(issued_at, utc_offset_hours)?;
        Ok(Self::new(race_date, issued_at, TriggerSource::Scheduled))
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}
