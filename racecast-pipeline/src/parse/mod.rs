//! Parsing and normalization
//!
//! Turns raw JSON documents into the typed race entities. Schema drift is
//! absorbed here through field aliases; anything that cannot be read becomes
//! a [`ParseFailure`] carrying a bounded excerpt of the document.

pub mod fields;
pub mod grade;

use chrono::NaiveDate;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::fetch::{DocumentKey, RawDocument};
use crate::models::{
    CardQuality, Entry, EntryHistory, HistoryIndex, HorseHistory, JockeyHistory, PastStart,
    RaceCard, RaceIdentifier, Surface,
};
use crate::types::{ParseFailure, ParseStage};
use fields::Object;

/// Minimum runners for a card to be scorable
pub const MIN_ENTRIES: usize = 2;

/// Optional entry fields counted by the data-quality report
const RECOMMENDED_FIELDS_PER_ENTRY: usize = 4;

/// Outcome of parsing every card of a batch
#[derive(Debug, Default)]
pub struct BatchParse {
    pub cards: Vec<RaceCard>,
    pub failures: Vec<(RaceIdentifier, ParseFailure)>,
}

/// Document parser; the only configuration is the card quality gate
#[derive(Debug, Clone, Default)]
pub struct Parser {
    /// Cards whose completeness falls below this are rejected (0.0 disables)
    pub min_card_completeness: f64,
}

impl Parser {
    pub fn new(min_card_completeness: f64) -> Self {
        Self {
            min_card_completeness,
        }
    }

    /// Races scheduled on `date`
    pub fn parse_card_index(
        &self,
        date: NaiveDate,
        doc: &RawDocument,
    ) -> Result<Vec<RaceIdentifier>, ParseFailure> {
        let stage = ParseStage::CardIndex;
        let root = decode(stage, doc)?;

        let items = match &root {
            Value::Array(items) => items,
            Value::Object(obj) => fields::array(obj, fields::RACES)
                .ok_or_else(|| ParseFailure::new(stage, "no race list", doc.bytes()))?,
            _ => return Err(ParseFailure::new(stage, "unexpected document root", doc.bytes())),
        };

        let mut races = Vec::with_capacity(items.len());
        for item in items {
            let race = match item {
                // Canonical "YYYY-MM-DD/VENUE/R<n>" strings
                Value::String(s) => s
                    .parse::<RaceIdentifier>()
                    .map_err(|e| ParseFailure::new(stage, e, doc.bytes()))?,
                Value::Object(obj) => {
                    let venue = fields::text(obj, fields::VENUE)
                        .ok_or_else(|| ParseFailure::new(stage, "race without venue", doc.bytes()))?;
                    let number = fields::small(obj, fields::RACE_NUMBER).ok_or_else(|| {
                        ParseFailure::new(stage, "race without race number", doc.bytes())
                    })?;
                    RaceIdentifier::new(fields::date(obj, fields::DATE).unwrap_or(date), venue, number)
                }
                _ => return Err(ParseFailure::new(stage, "unexpected race entry", doc.bytes())),
            };

            if race.date != date {
                warn!(race = %race, %date, "Card index lists a race on another date, skipping");
                continue;
            }
            races.push(race);
        }

        races.sort();
        races.dedup();
        debug!(%date, count = races.len(), "Parsed card index");
        Ok(races)
    }

    /// Full card for one race, quality gate applied
    pub fn parse_race_card(
        &self,
        race: &RaceIdentifier,
        doc: &RawDocument,
    ) -> Result<RaceCard, ParseFailure> {
        let stage = ParseStage::RaceCard;
        let root = decode(stage, doc)?;
        let obj = root
            .as_object()
            .ok_or_else(|| ParseFailure::new(stage, "card is not an object", doc.bytes()))?;

        let raw_entries = fields::array(obj, fields::ENTRIES)
            .ok_or_else(|| ParseFailure::new(stage, "card has no entry list", doc.bytes()))?;

        let mut entries = Vec::with_capacity(raw_entries.len());
        let mut seen_posts = HashSet::new();
        for (index, raw) in raw_entries.iter().enumerate() {
            let Some(entry_obj) = raw.as_object() else {
                return Err(ParseFailure::new(
                    stage,
                    format!("entry {} is not an object", index),
                    doc.bytes(),
                ));
            };
            if fields::boolean(entry_obj, fields::SCRATCHED) {
                debug!(race = %race, index, "Skipping scratched entry");
                continue;
            }

            let entry = parse_entry(entry_obj)
                .map_err(|msg| ParseFailure::new(stage, format!("entry {}: {}", index, msg), doc.bytes()))?;
            if !seen_posts.insert(entry.post_position) {
                return Err(ParseFailure::new(
                    stage,
                    format!("duplicate post position {}", entry.post_position),
                    doc.bytes(),
                ));
            }
            entries.push(entry);
        }

        if entries.len() < MIN_ENTRIES {
            return Err(ParseFailure::new(
                stage,
                format!("{} runner(s), at least {} required", entries.len(), MIN_ENTRIES),
                doc.bytes(),
            ));
        }
        entries.sort_by_key(|e| e.post_position);

        let quality = card_quality(&entries);
        if quality.completeness() < self.min_card_completeness {
            return Err(ParseFailure::new(
                ParseStage::QualityGate,
                format!(
                    "card completeness {:.2} below minimum {:.2}",
                    quality.completeness(),
                    self.min_card_completeness
                ),
                doc.bytes(),
            ));
        }

        let grade = fields::text(obj, fields::GRADE);
        let class_level = fields::small(obj, fields::CLASS_LEVEL)
            .or_else(|| grade.as_deref().and_then(grade::class_level));

        Ok(RaceCard {
            race: race.clone(),
            name: fields::text(obj, fields::RACE_NAME),
            post_time: fields::time(obj, fields::POST_TIME),
            distance_m: fields::unsigned(obj, fields::DISTANCE).filter(|d| *d > 0),
            surface: fields::text(obj, fields::SURFACE).and_then(|s| Surface::parse_lenient(&s)),
            track_condition: fields::text(obj, fields::TRACK_CONDITION),
            grade,
            class_level,
            entries,
            quality,
        })
    }

    /// Past starts of one horse, newest first
    pub fn parse_horse_history(&self, doc: &RawDocument) -> Result<HorseHistory, ParseFailure> {
        let stage = ParseStage::HorseHistory;
        let root = decode(stage, doc)?;

        let (horse_id, items) = match &root {
            Value::Array(items) => (None, items),
            Value::Object(obj) => (
                fields::text(obj, fields::HORSE_ID),
                fields::array(obj, fields::RESULTS)
                    .ok_or_else(|| ParseFailure::new(stage, "no result list", doc.bytes()))?,
            ),
            _ => return Err(ParseFailure::new(stage, "unexpected document root", doc.bytes())),
        };

        let horse_id = horse_id
            .or_else(|| match &doc.key {
                DocumentKey::HorseResults { horse_id } => Some(horse_id.clone()),
                _ => None,
            })
            .ok_or_else(|| ParseFailure::new(stage, "horse id unknown", doc.bytes()))?;

        let mut starts = Vec::with_capacity(items.len());
        for item in items {
            let Some(obj) = item.as_object() else {
                continue;
            };
            // Results without a date cannot be ordered; skip rather than guess
            let Some(date) = fields::date(obj, fields::DATE) else {
                debug!(horse = %horse_id, "Skipping result without date");
                continue;
            };
            let grade = fields::text(obj, fields::GRADE);
            starts.push(PastStart {
                date,
                venue: fields::text(obj, fields::VENUE),
                distance_m: fields::unsigned(obj, fields::DISTANCE).filter(|d| *d > 0),
                surface: fields::text(obj, fields::SURFACE).and_then(|s| Surface::parse_lenient(&s)),
                finish_position: fields::small(obj, fields::FINISH_POSITION).filter(|p| *p > 0),
                field_size: fields::small(obj, fields::FIELD_SIZE).filter(|n| *n > 0),
                speed_figure: fields::number(obj, fields::SPEED_FIGURE),
                class_level: fields::small(obj, fields::CLASS_LEVEL)
                    .or_else(|| grade.as_deref().and_then(grade::class_level)),
                jockey_id: fields::text(obj, fields::JOCKEY_ID),
            });
        }
        starts.sort_by(|a, b| b.date.cmp(&a.date));

        Ok(HorseHistory { horse_id, starts })
    }

    /// Jockey aggregate, from explicit counts or a result list
    pub fn parse_jockey_history(&self, doc: &RawDocument) -> Result<JockeyHistory, ParseFailure> {
        let stage = ParseStage::JockeyHistory;
        let root = decode(stage, doc)?;
        let obj = root
            .as_object()
            .ok_or_else(|| ParseFailure::new(stage, "jockey document is not an object", doc.bytes()))?;

        let jockey_id = fields::text(obj, fields::JOCKEY_ID)
            .or_else(|| fields::text(obj, &["id"]))
            .or_else(|| match &doc.key {
                DocumentKey::JockeyResults { jockey_id } => Some(jockey_id.clone()),
                _ => None,
            })
            .ok_or_else(|| ParseFailure::new(stage, "jockey id unknown", doc.bytes()))?;

        let counts = (
            fields::unsigned(obj, fields::RIDES),
            fields::unsigned(obj, fields::WINS),
            fields::unsigned(obj, fields::PLACES),
        );
        let (rides, wins, places) = match counts {
            (Some(rides), Some(wins), places) => (rides, wins, places.unwrap_or(wins)),
            _ => {
                let results = fields::array(obj, fields::RESULTS).ok_or_else(|| {
                    ParseFailure::new(stage, "neither counts nor results present", doc.bytes())
                })?;
                let positions: Vec<Option<u8>> = results
                    .iter()
                    .filter_map(Value::as_object)
                    .map(|r| fields::small(r, fields::FINISH_POSITION).filter(|p| *p > 0))
                    .collect();
                (
                    positions.len() as u32,
                    positions.iter().filter(|p| **p == Some(1)).count() as u32,
                    positions.iter().filter(|p| matches!(p, Some(1..=3))).count() as u32,
                )
            }
        };

        if wins > rides || places > rides || wins > places {
            return Err(ParseFailure::new(
                stage,
                format!("inconsistent counts: {} rides, {} wins, {} places", rides, wins, places),
                doc.bytes(),
            ));
        }

        Ok(JockeyHistory {
            jockey_id,
            rides,
            wins,
            places,
        })
    }

    /// Parse every race-card document; failures are collected, never fatal
    pub fn parse_batch(&self, docs: &[RawDocument]) -> BatchParse {
        let mut batch = BatchParse::default();
        for doc in docs {
            let DocumentKey::RaceCard(race) = &doc.key else {
                warn!(document = %doc.key, "Not a race card, ignored by batch parse");
                continue;
            };
            match self.parse_race_card(race, doc) {
                Ok(card) => batch.cards.push(card),
                Err(failure) => {
                    warn!(race = %race, error = %failure, "Race card rejected");
                    batch.failures.push((race.clone(), failure));
                }
            }
        }
        batch
    }
}

/// Give every entry its history; entries without records get an empty one
pub fn attach_histories(mut card: RaceCard, index: &HistoryIndex) -> RaceCard {
    for entry in &mut card.entries {
        entry.history = index.entry_history(&entry.horse_id, entry.jockey_id.as_deref());
    }
    card
}

fn decode(stage: ParseStage, doc: &RawDocument) -> Result<Value, ParseFailure> {
    let text = std::str::from_utf8(doc.bytes())
        .map_err(|e| ParseFailure::new(stage, format!("body is not UTF-8: {}", e), doc.bytes()))?;
    serde_json::from_str(text)
        .map_err(|e| ParseFailure::new(stage, format!("malformed JSON: {}", e), doc.bytes()))
}

fn parse_entry(obj: &Object) -> Result<Entry, String> {
    let horse_id = fields::text(obj, fields::HORSE_ID).ok_or("missing horse id")?;
    let post_position = fields::small(obj, fields::POST_POSITION)
        .filter(|p| *p > 0)
        .ok_or("missing or invalid post position")?;

    Ok(Entry {
        horse_name: fields::text(obj, fields::HORSE_NAME).unwrap_or_else(|| horse_id.clone()),
        horse_id,
        jockey_id: fields::text(obj, fields::JOCKEY_ID),
        trainer_id: fields::text(obj, fields::TRAINER_ID),
        post_position,
        odds: fields::number(obj, fields::ODDS).filter(|o| *o >= 1.0),
        weight_carried: fields::number(obj, fields::WEIGHT_CARRIED).filter(|w| *w > 0.0),
        age: fields::small(obj, fields::AGE).filter(|a| *a > 0),
        history: EntryHistory::default(),
    })
}

fn card_quality(entries: &[Entry]) -> CardQuality {
    let fields_present = entries
        .iter()
        .map(|e| {
            [
                e.odds.is_some(),
                e.weight_carried.is_some(),
                e.age.is_some(),
                e.trainer_id.is_some(),
            ]
            .into_iter()
            .filter(|present| *present)
            .count()
        })
        .sum();

    CardQuality {
        fields_expected: entries.len() * RECOMMENDED_FIELDS_PER_ENTRY,
        fields_present,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn race() -> RaceIdentifier {
        RaceIdentifier::new(NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(), "TOKYO", 11)
    }

    fn card_doc(body: Value) -> RawDocument {
        RawDocument::new(
            DocumentKey::RaceCard(race()),
            body.to_string().into_bytes(),
            Some("application/json".to_string()),
        )
    }

    fn runner(id: &str, post: u8) -> Value {
        json!({"horse_id": id, "horse_name": format!("Horse {}", id), "post_position": post})
    }

    #[test]
    fn test_parse_card_with_aliases() {
        // Given a card using alternative field names
        let doc = card_doc(json!({
            "title": "Tenno Sho (Autumn)",
            "distance": "2000m",
            "track_type": "芝",
            "going": "good",
            "class": "G1",
            "start_time": "15:40",
            "runners": [
                {"horseId": "H2", "name": "Beta", "barrier": 2, "win_odds": 3.4, "jockey": "J2"},
                {"horseId": "H1", "name": "Alpha", "gate": 1, "odds": null, "weight": 58.0}
            ]
        }));

        // When parsed
        let card = Parser::default().parse_race_card(&race(), &doc).unwrap();

        // Then aliases resolve and entries are ordered by post position
        assert_eq!(card.name.as_deref(), Some("Tenno Sho (Autumn)"));
        assert_eq!(card.distance_m, Some(2000));
        assert_eq!(card.surface, Some(Surface::Turf));
        assert_eq!(card.class_level, Some(8));
        assert_eq!(card.entries[0].horse_id, "H1");
        assert_eq!(card.entries[0].odds, None);
        assert_eq!(card.entries[0].weight_carried, Some(58.0));
        assert_eq!(card.entries[1].odds, Some(3.4));
        assert_eq!(card.entries[1].jockey_id.as_deref(), Some("J2"));
    }

    #[test]
    fn test_single_runner_card_rejected() {
        let doc = card_doc(json!({"entries": [runner("H1", 1)]}));
        let err = Parser::default().parse_race_card(&race(), &doc).unwrap_err();
        assert_eq!(err.stage, ParseStage::RaceCard);
        assert!(err.message.contains("at least 2"));
    }

    #[test]
    fn test_scratched_runner_does_not_count() {
        let doc = card_doc(json!({"entries": [
            runner("H1", 1),
            {"horse_id": "H2", "post_position": 2, "scratched": true}
        ]}));
        assert!(Parser::default().parse_race_card(&race(), &doc).is_err());
    }

    #[test]
    fn test_duplicate_post_positions_rejected() {
        let doc = card_doc(json!({"entries": [runner("H1", 3), runner("H2", 3)]}));
        let err = Parser::default().parse_race_card(&race(), &doc).unwrap_err();
        assert!(err.message.contains("duplicate post position 3"));
    }

    #[test]
    fn test_non_utf8_body_rejected_with_bounded_snippet() {
        let mut body = vec![0xff, 0xfe];
        body.extend(std::iter::repeat(b'a').take(400));
        let doc = RawDocument::new(DocumentKey::RaceCard(race()), body, None);

        let err = Parser::default().parse_race_card(&race(), &doc).unwrap_err();
        assert!(err.message.contains("UTF-8"));
        assert!(err.offending_snippet.chars().count() <= crate::types::SNIPPET_MAX_CHARS);
    }

    #[test]
    fn test_quality_gate() {
        let doc = card_doc(json!({"entries": [runner("H1", 1), runner("H2", 2)]}));

        assert!(Parser::new(0.0).parse_race_card(&race(), &doc).is_ok());
        let err = Parser::new(0.94).parse_race_card(&race(), &doc).unwrap_err();
        assert_eq!(err.stage, ParseStage::QualityGate);
    }

    #[test]
    fn test_card_index_accepts_objects_and_strings() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let doc = RawDocument::new(
            DocumentKey::CardIndex { date },
            json!({"races": [
                {"venue": "kyoto", "race_no": 2},
                "2026-10-18/TOKYO/R1",
                {"venue": "kyoto", "race_no": 2},
                "2026-10-19/TOKYO/R1"
            ]})
            .to_string()
            .into_bytes(),
            None,
        );

        let races = Parser::default().parse_card_index(date, &doc).unwrap();
        let labels: Vec<String> = races.iter().map(|r| r.to_string()).collect();
        assert_eq!(labels, vec!["2026-10-18/KYOTO/R2", "2026-10-18/TOKYO/R1"]);
    }

    #[test]
    fn test_horse_history_uses_key_when_id_absent() {
        let doc = RawDocument::new(
            DocumentKey::HorseResults {
                horse_id: "H9".to_string(),
            },
            json!([
                {"date": "2026-05-01", "finish": "中止", "distance": 1600},
                {"date": "2026-08-01", "finish_position": 1, "field_size": 12, "grade": "G3"},
                {"finish_position": 2}
            ])
            .to_string()
            .into_bytes(),
            None,
        );

        let history = Parser::default().parse_horse_history(&doc).unwrap();
        assert_eq!(history.horse_id, "H9");
        assert_eq!(history.starts.len(), 2);
        assert!(history.starts[0].is_win());
        assert_eq!(history.starts[0].class_level, Some(6));
        assert_eq!(history.starts[1].finish_position, None);
    }

    #[test]
    fn test_jockey_history_from_results() {
        let doc = RawDocument::new(
            DocumentKey::JockeyResults {
                jockey_id: "J1".to_string(),
            },
            json!({"results": [{"finish": 1}, {"finish": 3}, {"finish": 7}, {"finish": "DQ"}]})
                .to_string()
                .into_bytes(),
            None,
        );

        let jockey = Parser::default().parse_jockey_history(&doc).unwrap();
        assert_eq!((jockey.rides, jockey.wins, jockey.places), (4, 1, 2));
    }

    #[test]
    fn test_jockey_inconsistent_counts_rejected() {
        let doc = RawDocument::new(
            DocumentKey::JockeyResults {
                jockey_id: "J1".to_string(),
            },
            json!({"rides": 10, "wins": 12, "places": 12}).to_string().into_bytes(),
            None,
        );
        assert!(Parser::default().parse_jockey_history(&doc).is_err());
    }

    #[test]
    fn test_batch_isolates_failures() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let good_race = RaceIdentifier::new(date, "TOKYO", 1);
        let bad_race = RaceIdentifier::new(date, "TOKYO", 2);
        let docs = vec![
            RawDocument::new(
                DocumentKey::RaceCard(good_race.clone()),
                json!({"entries": [runner("H1", 1), runner("H2", 2)]}).to_string().into_bytes(),
                None,
            ),
            RawDocument::new(DocumentKey::RaceCard(bad_race.clone()), b"<html>".to_vec(), None),
        ];

        let batch = Parser::default().parse_batch(&docs);
        assert_eq!(batch.cards.len(), 1);
        assert_eq!(batch.cards[0].race, good_race);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].0, bad_race);
        assert_eq!(batch.failures[0].1.offending_snippet, "<html>");
    }
}
