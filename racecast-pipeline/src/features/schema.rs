//! Feature schema definitions
//!
//! A schema owns the feature names and how each is computed. Vectors are
//! tagged with the schema version so stored predictions can be traced back to
//! the definitions that produced them.

use std::collections::BTreeMap;

use crate::models::{Entry, FeatureSchemaVersion, PastStart, RaceCard, MISSING_FEATURE};

pub const HORSE_WIN_RATE: &str = "horse_win_rate";
pub const HORSE_PLACE_RATE: &str = "horse_place_rate";
pub const HORSE_AVG_FINISH: &str = "horse_avg_finish";
pub const CLASS_ADJUSTED_SPEED: &str = "class_adjusted_speed";
pub const DISTANCE_FIT: &str = "distance_fit";
pub const SURFACE_FIT: &str = "surface_fit";
pub const DAYS_SINCE_LAST_RUN: &str = "days_since_last_run";
pub const JOCKEY_WIN_RATE: &str = "jockey_win_rate";
pub const JOCKEY_HORSE_SYNERGY: &str = "jockey_horse_synergy";
pub const POST_POSITION_NORM: &str = "post_position_norm";
pub const ODDS_IMPLIED_PROB: &str = "odds_implied_prob";
pub const WEIGHT_CARRIED: &str = "weight_carried";
pub const IS_DEBUT: &str = "is_debut";

/// Versioned set of feature definitions
pub trait FeatureSchema: Send + Sync {
    fn version(&self) -> FeatureSchemaVersion;

    /// Feature names in schema order
    fn names(&self) -> &'static [&'static str];

    /// Values for one entry; must yield exactly `names()`, using the sentinel when unknown
    fn compute(&self, card: &RaceCard, entry: &Entry) -> BTreeMap<String, f64>;
}

/// Look up a schema by its version tag
pub fn schema_for_version(tag: &str, recent_form_window: usize) -> Option<Box<dyn FeatureSchema>> {
    match tag {
        SchemaV1::VERSION => Some(Box::new(SchemaV1::new(recent_form_window))),
        _ => None,
    }
}

/// Distances within this many metres count as the same trip
const DISTANCE_TOLERANCE_M: u32 = 200;
/// Speed-figure points per class step between a past race and today's
const CLASS_STEP_POINTS: f64 = 2.0;
/// Scale applied to speed figures (published figures sit around 100)
const SPEED_SCALE: f64 = 100.0;

/// Form, ability, jockey and market features (13 wide)
#[derive(Debug, Clone)]
pub struct SchemaV1 {
    recent_form_window: usize,
}

impl SchemaV1 {
    pub const VERSION: &'static str = "v1";

    const NAMES: [&'static str; 13] = [
        HORSE_WIN_RATE,
        HORSE_PLACE_RATE,
        HORSE_AVG_FINISH,
        CLASS_ADJUSTED_SPEED,
        DISTANCE_FIT,
        SURFACE_FIT,
        DAYS_SINCE_LAST_RUN,
        JOCKEY_WIN_RATE,
        JOCKEY_HORSE_SYNERGY,
        POST_POSITION_NORM,
        ODDS_IMPLIED_PROB,
        WEIGHT_CARRIED,
        IS_DEBUT,
    ];

    pub fn new(recent_form_window: usize) -> Self {
        Self {
            recent_form_window: recent_form_window.max(1),
        }
    }
}

/// Ratio, or the sentinel when the denominator is empty
fn rate(hits: usize, total: usize) -> f64 {
    if total == 0 {
        MISSING_FEATURE
    } else {
        hits as f64 / total as f64
    }
}

fn place_rate<'a>(starts: impl Iterator<Item = &'a PastStart>) -> f64 {
    let (placed, total) = starts.fold((0, 0), |(p, t), s| (p + s.is_place() as usize, t + 1));
    rate(placed, total)
}

impl FeatureSchema for SchemaV1 {
    fn version(&self) -> FeatureSchemaVersion {
        FeatureSchemaVersion::new(Self::VERSION)
    }

    fn names(&self) -> &'static [&'static str] {
        &Self::NAMES
    }

    fn compute(&self, card: &RaceCard, entry: &Entry) -> BTreeMap<String, f64> {
        // Only starts before the race day; a results page may already list today
        let prior: Vec<&PastStart> = entry
            .history
            .starts
            .iter()
            .filter(|s| s.date < card.race.date)
            .collect();
        let recent = &prior[..prior.len().min(self.recent_form_window)];

        let mut values = BTreeMap::new();
        let mut set = |name: &str, value: f64| {
            values.insert(name.to_string(), value);
        };

        set(
            HORSE_WIN_RATE,
            rate(recent.iter().filter(|s| s.is_win()).count(), recent.len()),
        );
        set(HORSE_PLACE_RATE, place_rate(recent.iter().copied()));

        let finishes: Vec<f64> = recent
            .iter()
            .filter_map(|s| s.finish_position)
            .map(f64::from)
            .collect();
        set(
            HORSE_AVG_FINISH,
            if finishes.is_empty() {
                MISSING_FEATURE
            } else {
                finishes.iter().sum::<f64>() / finishes.len() as f64
            },
        );

        let adjusted: Vec<f64> = recent
            .iter()
            .filter_map(|s| {
                let speed = s.speed_figure?;
                let class_diff = match (s.class_level, card.class_level) {
                    (Some(then), Some(now)) => f64::from(then) - f64::from(now),
                    _ => 0.0,
                };
                Some((speed + CLASS_STEP_POINTS * class_diff).max(0.0) / SPEED_SCALE)
            })
            .collect();
        set(
            CLASS_ADJUSTED_SPEED,
            if adjusted.is_empty() {
                MISSING_FEATURE
            } else {
                adjusted.iter().sum::<f64>() / adjusted.len() as f64
            },
        );

        set(
            DISTANCE_FIT,
            match card.distance_m {
                Some(distance) => place_rate(prior.iter().copied().filter(|s| {
                    s.distance_m
                        .is_some_and(|d| d.abs_diff(distance) <= DISTANCE_TOLERANCE_M)
                })),
                None => MISSING_FEATURE,
            },
        );

        set(
            SURFACE_FIT,
            match card.surface {
                Some(surface) => {
                    place_rate(prior.iter().copied().filter(|s| s.surface == Some(surface)))
                }
                None => MISSING_FEATURE,
            },
        );

        set(
            DAYS_SINCE_LAST_RUN,
            prior
                .first()
                .map(|last| (card.race.date - last.date).num_days() as f64)
                .unwrap_or(MISSING_FEATURE),
        );

        set(
            JOCKEY_WIN_RATE,
            entry
                .history
                .jockey
                .as_ref()
                .map(|j| rate(j.wins as usize, j.rides as usize))
                .unwrap_or(MISSING_FEATURE),
        );

        set(
            JOCKEY_HORSE_SYNERGY,
            match entry.jockey_id.as_deref() {
                Some(jockey) => place_rate(
                    prior
                        .iter()
                        .copied()
                        .filter(|s| s.jockey_id.as_deref() == Some(jockey)),
                ),
                None => MISSING_FEATURE,
            },
        );

        let field = card.field_size();
        set(
            POST_POSITION_NORM,
            if field > 1 {
                (f64::from(entry.post_position.saturating_sub(1)) / (field - 1) as f64).min(1.0)
            } else {
                0.0
            },
        );

        set(
            ODDS_IMPLIED_PROB,
            entry.odds.map(|o| 1.0 / o).unwrap_or(MISSING_FEATURE),
        );
        set(WEIGHT_CARRIED, entry.weight_carried.unwrap_or(MISSING_FEATURE));
        set(IS_DEBUT, if prior.is_empty() { 1.0 } else { 0.0 });

        values
    }
}
