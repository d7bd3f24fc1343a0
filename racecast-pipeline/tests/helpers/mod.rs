//! Test Helper Utilities
//!
//! Shared utilities for racecast-pipeline integration tests

#![allow(dead_code)]

pub mod db_utils;
pub mod fixtures;
pub mod scripted_source;

pub use db_utils::{create_test_store, test_orchestrator, test_settings};
pub use fixtures::{race, race_date, seed_meeting, seed_race, RaceFixture};
pub use scripted_source::{Reply, ScriptedSource};
