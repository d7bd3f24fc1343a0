//! Pipeline event types and broadcast bus
//!
//! Events are observational only: the orchestrator never waits on a
//! subscriber, and emitting with no subscribers is not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Racecast pipeline events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A trigger started processing a race date
    TriggerStarted {
        trigger_id: Uuid,
        race_date: String,
        timestamp: DateTime<Utc>,
    },

    /// Race discovery finished for the trigger date
    RacesDiscovered {
        trigger_id: Uuid,
        race_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A race run moved to a new stage
    StageChanged {
        run_id: Uuid,
        /// Canonical race identifier (`YYYY-MM-DD/VENUE/R<n>`)
        race: String,
        old_stage: String,
        new_stage: String,
        timestamp: DateTime<Utc>,
    },

    /// A race run reached Done
    RaceCompleted {
        run_id: Uuid,
        race: String,
        /// True when an already stored prediction was returned
        reused: bool,
        timestamp: DateTime<Utc>,
    },

    /// A race run reached Failed
    RaceFailed {
        run_id: Uuid,
        race: String,
        stage: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Every race of the trigger reached a terminal state
    TriggerCompleted {
        trigger_id: Uuid,
        succeeded: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Event name, as used for the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::TriggerStarted { .. } => "TriggerStarted",
            PipelineEvent::RacesDiscovered { .. } => "RacesDiscovered",
            PipelineEvent::StageChanged { .. } => "StageChanged",
            PipelineEvent::RaceCompleted { .. } => "RaceCompleted",
            PipelineEvent::RaceFailed { .. } => "RaceFailed",
            PipelineEvent::TriggerCompleted { .. } => "TriggerCompleted",
        }
    }
}

/// Broadcast bus for pipeline events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(8);
        let result = bus.emit(PipelineEvent::TriggerStarted {
            trigger_id: Uuid::new_v4(),
            race_date: "2026-10-18".to_string(),
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let run_id = Uuid::new_v4();

        bus.emit_lossy(PipelineEvent::StageChanged {
            run_id,
            race: "2026-10-18/TOKYO/R11".to_string(),
            old_stage: "Pending".to_string(),
            new_stage: "Fetching".to_string(),
            timestamp: Utc::now(),
        });
        bus.emit_lossy(PipelineEvent::RaceCompleted {
            run_id,
            race: "2026-10-18/TOKYO/R11".to_string(),
            reused: false,
            timestamp: Utc::now(),
        });

        assert!(matches!(
            rx.recv().await.unwrap(),
            PipelineEvent::StageChanged { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            PipelineEvent::RaceCompleted { reused: false, .. }
        ));
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = PipelineEvent::TriggerCompleted {
            trigger_id: Uuid::nil(),
            succeeded: 4,
            failed: 1,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());
        assert_eq!(json["succeeded"], 4);
    }
}
