//! # Racecast Common Library
//!
//! Shared code for the racecast prediction service:
//! - Error type shared by library crates
//! - Configuration loading (CLI / environment / TOML priority)
//! - SQLite pool initialization
//! - Pipeline event types and the event bus
//! - Trigger-date helpers

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
