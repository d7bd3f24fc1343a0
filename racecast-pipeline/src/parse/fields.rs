//! Alias-tolerant field access over JSON objects
//!
//! Upstream pages rename fields between layouts; each logical field is looked
//! up through a list of known spellings, first match wins. Null counts as
//! absent. Numeric fields accept numbers or numeric strings with a unit suffix
//! ("1600m", "57.0kg").

use chrono::{NaiveDate, NaiveTime};
use serde_json::{Map, Value};

pub type Object = Map<String, Value>;

// Card index
pub const RACES: &[&str] = &["races", "race_list", "cards", "schedule"];
pub const VENUE: &[&str] = &["venue", "course", "track_name", "racecourse", "place"];
pub const RACE_NUMBER: &[&str] = &["race_number", "number", "race_no", "r", "round"];

// Race card
pub const ENTRIES: &[&str] = &["entries", "runners", "horses", "starters"];
pub const RACE_NAME: &[&str] = &["race_name", "name", "title"];
pub const POST_TIME: &[&str] = &["post_time", "start_time", "off_time"];
pub const DISTANCE: &[&str] = &["distance_m", "distance", "dist"];
pub const SURFACE: &[&str] = &["surface", "track_type", "course_type"];
pub const TRACK_CONDITION: &[&str] = &["track_condition", "condition", "going", "baba"];
pub const GRADE: &[&str] = &["grade", "class", "race_class"];
pub const CLASS_LEVEL: &[&str] = &["class_level"];

// Entry
pub const HORSE_ID: &[&str] = &["horse_id", "horseId", "horse_code", "id"];
pub const HORSE_NAME: &[&str] = &["horse_name", "horseName", "name", "horse"];
pub const JOCKEY_ID: &[&str] = &["jockey_id", "jockeyId", "jockey_code", "jockey"];
pub const TRAINER_ID: &[&str] = &["trainer_id", "trainerId", "trainer_code", "trainer"];
pub const POST_POSITION: &[&str] = &["post_position", "gate", "barrier", "horse_number", "umaban"];
pub const ODDS: &[&str] = &["odds", "win_odds", "tansho"];
pub const WEIGHT_CARRIED: &[&str] = &["weight_carried", "carried_weight", "weight", "impost"];
pub const AGE: &[&str] = &["age"];
pub const SCRATCHED: &[&str] = &["scratched", "withdrawn", "non_runner"];

// Histories
pub const RESULTS: &[&str] = &["results", "starts", "runs", "past_performances"];
pub const DATE: &[&str] = &["date", "race_date"];
pub const FINISH_POSITION: &[&str] = &["finish_position", "finish", "position", "placing"];
pub const FIELD_SIZE: &[&str] = &["field_size", "runners_count", "horse_count"];
pub const SPEED_FIGURE: &[&str] = &["speed_figure", "speed", "time_index"];
pub const RIDES: &[&str] = &["rides", "mounts", "starts_count"];
pub const WINS: &[&str] = &["wins", "firsts"];
pub const PLACES: &[&str] = &["places", "top3", "in_the_money"];

/// First non-null value under any alias
pub fn lookup<'a>(obj: &'a Object, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|alias| obj.get(*alias))
        .find(|v| !v.is_null())
}

/// Non-empty trimmed text; numbers are rendered as text (ids are often numeric)
pub fn text(obj: &Object, aliases: &[&str]) -> Option<String> {
    let value = lookup(obj, aliases)?;
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        // `{"id": "...", "name": "..."}` style references
        Value::Object(inner) => return text(inner, &["id", "code"]),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// Lenient float: number, or string with an optional unit suffix
pub fn number(obj: &Object, aliases: &[&str]) -> Option<f64> {
    match lookup(obj, aliases)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_numeric(s),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn parse_numeric(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let end = trimmed
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == '-'))
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    trimmed[..end].parse::<f64>().ok()
}

/// Non-negative integer that fits in `u32`
pub fn unsigned(obj: &Object, aliases: &[&str]) -> Option<u32> {
    let v = number(obj, aliases)?;
    (v >= 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64).then_some(v as u32)
}

pub fn small(obj: &Object, aliases: &[&str]) -> Option<u8> {
    unsigned(obj, aliases).and_then(|v| u8::try_from(v).ok())
}

pub fn boolean(obj: &Object, aliases: &[&str]) -> bool {
    match lookup(obj, aliases) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1"),
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    }
}

pub fn date(obj: &Object, aliases: &[&str]) -> Option<NaiveDate> {
    let raw = text(obj, aliases)?;
    ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&raw, fmt).ok())
}

pub fn time(obj: &Object, aliases: &[&str]) -> Option<NaiveTime> {
    let raw = text(obj, aliases)?;
    ["%H:%M", "%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(&raw, fmt).ok())
}

/// Array under any alias
pub fn array<'a>(obj: &'a Object, aliases: &[&str]) -> Option<&'a Vec<Value>> {
    lookup(obj, aliases).and_then(Value::as_array)
}
