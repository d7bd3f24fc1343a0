//! Upstream document fixtures
//!
//! A meeting at TOKYO on 2026-10-18. Horse `H{race}{post}` is ridden by
//! jockey `J{post}`; each horse has two dated past starts.

use chrono::NaiveDate;
use racecast_pipeline::fetch::DocumentKey;
use racecast_pipeline::models::RaceIdentifier;
use serde_json::json;

use super::ScriptedSource;

pub const VENUE: &str = "TOKYO";

pub fn race_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
}

pub fn race(number: u8) -> RaceIdentifier {
    RaceIdentifier::new(race_date(), VENUE, number)
}

/// Shape of one race card
#[derive(Debug, Clone)]
pub struct RaceFixture {
    pub number: u8,
    pub runners: u8,
    /// None publishes the card without a distance
    pub distance_m: Option<u32>,
}

impl RaceFixture {
    pub fn new(number: u8) -> Self {
        Self {
            number,
            runners: 6,
            distance_m: Some(1600 + 200 * u32::from(number % 3)),
        }
    }

    pub fn runners(mut self, runners: u8) -> Self {
        self.runners = runners;
        self
    }

    pub fn without_distance(mut self) -> Self {
        self.distance_m = None;
        self
    }

    pub fn horse_id(&self, post: u8) -> String {
        format!("H{}{:02}", self.number, post)
    }
}

pub fn jockey_id(post: u8) -> String {
    format!("J{:02}", post)
}

pub fn card_index(races: &[RaceIdentifier]) -> String {
    let races: Vec<String> = races.iter().map(|r| r.to_string()).collect();
    json!({ "date": race_date().to_string(), "races": races }).to_string()
}

pub fn race_card(fixture: &RaceFixture) -> String {
    let entries: Vec<_> = (1..=fixture.runners)
        .map(|post| {
            json!({
                "horse_id": fixture.horse_id(post),
                "horse_name": format!("Runner {}-{}", fixture.number, post),
                "jockey_id": jockey_id(post),
                "post_position": post,
                "odds": 2.0 + f64::from(post) * 1.5,
                "weight_carried": 55.0 + f64::from(post % 3),
                "age": 3 + post % 3,
            })
        })
        .collect();

    let mut card = json!({
        "race_name": format!("Race {}", fixture.number),
        "post_time": "15:40",
        "surface": "turf",
        "track_condition": "good",
        "grade": if fixture.number == 11 { "G2" } else { "2勝クラス" },
        "entries": entries,
    });
    if let Some(distance) = fixture.distance_m {
        card["distance_m"] = json!(distance);
    }
    card.to_string()
}

pub fn horse_results(horse_id: &str, post: u8) -> String {
    json!({
        "horse_id": horse_id,
        "results": [
            {
                "date": "2026-09-20",
                "venue": "NAKAYAMA",
                "distance_m": 1600,
                "surface": "turf",
                "finish_position": post,
                "field_size": 12,
                "speed_figure": 90.0 - f64::from(post),
                "grade": "2勝クラス",
                "jockey_id": jockey_id(post),
            },
            {
                "date": "2026-08-15",
                "venue": "NIIGATA",
                "distance_m": 1800,
                "surface": "turf",
                "finish_position": (post % 4) + 1,
                "field_size": 14,
                "speed_figure": 85.0,
                "grade": "1勝クラス",
            }
        ]
    })
    .to_string()
}

pub fn jockey_results(jockey_id: &str, post: u8) -> String {
    let rides = 200 + u32::from(post) * 10;
    let wins = 30 - u32::from(post);
    json!({
        "jockey_id": jockey_id,
        "rides": rides,
        "wins": wins,
        "places": wins * 2,
    })
    .to_string()
}

/// Register a race card and every runner's and rider's history
pub fn seed_race(source: &ScriptedSource, fixture: &RaceFixture) {
    source.document(
        &DocumentKey::RaceCard(race(fixture.number)),
        race_card(fixture),
    );
    for post in 1..=fixture.runners {
        let horse_id = fixture.horse_id(post);
        source.document(
            &DocumentKey::HorseResults {
                horse_id: horse_id.clone(),
            },
            horse_results(&horse_id, post),
        );
        let jockey = jockey_id(post);
        source.document(
            &DocumentKey::JockeyResults {
                jockey_id: jockey.clone(),
            },
            jockey_results(&jockey, post),
        );
    }
}

/// Register the card index plus every race of the meeting
pub fn seed_meeting(source: &ScriptedSource, fixtures: &[RaceFixture]) {
    let races: Vec<RaceIdentifier> = fixtures.iter().map(|f| race(f.number)).collect();
    source.document(
        &DocumentKey::CardIndex { date: race_date() },
        card_index(&races),
    );
    for fixture in fixtures {
        seed_race(source, fixture);
    }
}
