//! Trigger orchestration and batch reporting
//!
//! A trigger discovers the day's races, runs each through
//! fetch → parse → features → ensemble → store in its own worker, and
//! returns a [`BatchReport`] naming every race's prediction or failure.

pub mod orchestrator;
pub mod report;

pub use orchestrator::{Orchestrator, OrchestratorSettings, ABORT_GRACE};
pub use report::{BatchReport, RaceOutcome, RaceResult, SUMMARY_TOP_PICKS};
