//! Normalized race entities
//!
//! Produced only by the parser; everything downstream consumes these typed
//! values and never sees raw documents.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::history::EntryHistory;

/// (date, venue, race number); unique per race day
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RaceIdentifier {
    pub date: NaiveDate,
    /// Venue code, normalized to upper case
    pub venue: String,
    pub race_number: u8,
}

impl RaceIdentifier {
    pub fn new(date: NaiveDate, venue: impl AsRef<str>, race_number: u8) -> Self {
        Self {
            date,
            venue: normalize_venue(venue.as_ref()),
            race_number,
        }
    }
}

/// Venue codes are compared case-insensitively and without inner whitespace
pub fn normalize_venue(venue: &str) -> String {
    venue
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_uppercase()
}

impl fmt::Display for RaceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/R{}",
            self.date.format("%Y-%m-%d"),
            self.venue,
            self.race_number
        )
    }
}

impl FromStr for RaceIdentifier {
    type Err = String;

    /// Parses the canonical `YYYY-MM-DD/VENUE/R<n>` form
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let (Some(date), Some(venue), Some(number), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("expected DATE/VENUE/R<n>, got '{}'", s));
        };

        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| format!("invalid date '{}': {}", date, e))?;
        let number = number.trim_start_matches(['R', 'r']);
        let race_number = number
            .parse::<u8>()
            .map_err(|e| format!("invalid race number '{}': {}", number, e))?;
        if venue.trim().is_empty() {
            return Err("empty venue".to_string());
        }

        Ok(RaceIdentifier::new(date, venue, race_number))
    }
}

/// Racing surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    Turf,
    Dirt,
    Synthetic,
}

impl Surface {
    /// Lenient mapping of upstream spellings (including JRA labels)
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "turf" | "grass" | "芝" => Some(Surface::Turf),
            "dirt" | "ダート" | "ダ" => Some(Surface::Dirt),
            "synthetic" | "aw" | "all-weather" | "polytrack" | "tapeta" => {
                Some(Surface::Synthetic)
            }
            _ => None,
        }
    }
}

/// One horse/jockey pairing in a race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub horse_id: String,
    pub horse_name: String,
    /// None until the jockey is declared
    pub jockey_id: Option<String>,
    pub trainer_id: Option<String>,
    pub post_position: u8,
    /// None until the market publishes
    pub odds: Option<f64>,
    /// Carried weight in kilograms
    pub weight_carried: Option<f64>,
    pub age: Option<u8>,
    /// Past results; empty until history documents are attached
    pub history: EntryHistory,
}

/// Share of recommended (non-required) entry fields that were present
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CardQuality {
    pub fields_expected: usize,
    pub fields_present: usize,
}

impl CardQuality {
    pub fn completeness(&self) -> f64 {
        if self.fields_expected == 0 {
            1.0
        } else {
            self.fields_present as f64 / self.fields_expected as f64
        }
    }
}

/// Race card: read-only after parsing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceCard {
    pub race: RaceIdentifier,
    pub name: Option<String>,
    pub post_time: Option<NaiveTime>,
    pub distance_m: Option<u32>,
    pub surface: Option<Surface>,
    pub track_condition: Option<String>,
    /// Grade label as published (e.g. "G1", "OP", "1勝クラス")
    pub grade: Option<String>,
    /// Numeric class ladder derived from the grade (1 = maiden .. 8 = G1)
    pub class_level: Option<u8>,
    /// Ordered by post position
    pub entries: Vec<Entry>,
    pub quality: CardQuality,
}

impl RaceCard {
    pub fn venue(&self) -> &str {
        &self.race.venue
    }

    pub fn field_size(&self) -> usize {
        self.entries.len()
    }

    /// Horse ids whose result history is needed
    pub fn horse_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.horse_id.clone()).collect()
    }

    /// Distinct declared jockey ids
    pub fn jockey_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .filter_map(|e| e.jockey_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_race_identifier_round_trips_through_text() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let id = RaceIdentifier::new(date, "tokyo", 11);
        assert_eq!(id.to_string(), "2026-10-18/TOKYO/R11");
        assert_eq!("2026-10-18/TOKYO/R11".parse::<RaceIdentifier>().unwrap(), id);
    }

    #[test]
    fn test_race_identifier_rejects_malformed_text() {
        assert!("2026-10-18/TOKYO".parse::<RaceIdentifier>().is_err());
        assert!("2026-10-18/TOKYO/Rx".parse::<RaceIdentifier>().is_err());
        assert!("2026-13-18/TOKYO/R1".parse::<RaceIdentifier>().is_err());
        assert!("2026-10-18/ /R1".parse::<RaceIdentifier>().is_err());
    }

    #[test]
    fn test_venue_normalization() {
        assert_eq!(normalize_venue(" Nakayama "), "NAKAYAMA");
        assert_eq!(normalize_venue("santa anita"), "SANTA_ANITA");
    }

    #[test]
    fn test_surface_lenient_parse() {
        assert_eq!(Surface::parse_lenient("芝"), Some(Surface::Turf));
        assert_eq!(Surface::parse_lenient("DIRT"), Some(Surface::Dirt));
        assert_eq!(Surface::parse_lenient("mud"), None);
    }

    #[test]
    fn test_card_quality_completeness() {
        let q = CardQuality {
            fields_expected: 8,
            fields_present: 6,
        };
        assert!((q.completeness() - 0.75).abs() < f64::EPSILON);
        let empty = CardQuality {
            fields_expected: 0,
            fields_present: 0,
        };
        assert_eq!(empty.completeness(), 1.0);
    }
}
