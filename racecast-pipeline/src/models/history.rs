//! Historical result aggregates consumed by the feature builder

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::race::Surface;

/// One past start of a horse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PastStart {
    pub date: NaiveDate,
    pub venue: Option<String>,
    pub distance_m: Option<u32>,
    pub surface: Option<Surface>,
    /// None for did-not-finish / scratched
    pub finish_position: Option<u8>,
    pub field_size: Option<u8>,
    pub speed_figure: Option<f64>,
    pub class_level: Option<u8>,
    pub jockey_id: Option<String>,
}

impl PastStart {
    pub fn is_win(&self) -> bool {
        self.finish_position == Some(1)
    }

    /// Top-three finish
    pub fn is_place(&self) -> bool {
        matches!(self.finish_position, Some(1..=3))
    }
}

/// Parsed result history of one horse, newest start first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorseHistory {
    pub horse_id: String,
    pub starts: Vec<PastStart>,
}

/// Career aggregate of one jockey
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JockeyHistory {
    pub jockey_id: String,
    pub rides: u32,
    pub wins: u32,
    /// Top-three finishes
    pub places: u32,
}

/// History owned by an entry once attached to its card
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryHistory {
    /// Newest first
    pub starts: Vec<PastStart>,
    pub jockey: Option<JockeyHistory>,
}

impl EntryHistory {
    pub fn is_debut(&self) -> bool {
        self.starts.is_empty()
    }
}

/// Histories fetched for one race, keyed by horse / jockey id
#[derive(Debug, Clone, Default)]
pub struct HistoryIndex {
    pub horses: HashMap<String, HorseHistory>,
    pub jockeys: HashMap<String, JockeyHistory>,
}

impl HistoryIndex {
    pub fn insert_horse(&mut self, history: HorseHistory) {
        self.horses.insert(history.horse_id.clone(), history);
    }

    pub fn insert_jockey(&mut self, history: JockeyHistory) {
        self.jockeys.insert(history.jockey_id.clone(), history);
    }

    /// History for an entry; a horse or jockey without records yields an empty history
    pub fn entry_history(&self, horse_id: &str, jockey_id: Option<&str>) -> EntryHistory {
        let mut starts = self
            .horses
            .get(horse_id)
            .map(|h| h.starts.clone())
            .unwrap_or_default();
        // Newest first, stable on equal dates
        starts.sort_by(|a, b| b.date.cmp(&a.date));

        EntryHistory {
            starts,
            jockey: jockey_id.and_then(|id| self.jockeys.get(id).cloned()),
        }
    }
}
