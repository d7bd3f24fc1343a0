//! Source fetching
//!
//! Retrieves raw race-card and result documents. Everything here deals in
//! bytes; interpretation belongs to the parser. Transport failures are
//! classified at the source, retried by [`Fetcher`] under a [`RetryPolicy`],
//! and surfaced as [`FetchFailure`](crate::types::FetchFailure).

mod fetcher;
mod http_source;
mod retry;
mod single_flight;

pub use fetcher::{FetchResult, Fetcher};
pub use http_source::HttpSource;
pub use retry::RetryPolicy;
pub use single_flight::SingleFlight;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::models::RaceIdentifier;

/// Identifies one upstream document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentKey {
    /// Races scheduled on a date
    CardIndex { date: NaiveDate },
    /// Entries and conditions of one race
    RaceCard(RaceIdentifier),
    /// Past results of a horse
    HorseResults { horse_id: String },
    /// Career aggregate of a jockey
    JockeyResults { jockey_id: String },
}

impl DocumentKey {
    /// Path relative to the source base
    pub fn path(&self) -> String {
        match self {
            DocumentKey::CardIndex { date } => format!("cards/{}", date.format("%Y-%m-%d")),
            DocumentKey::RaceCard(race) => format!(
                "cards/{}/{}/{}",
                race.date.format("%Y-%m-%d"),
                race.venue,
                race.race_number
            ),
            DocumentKey::HorseResults { horse_id } => format!("horses/{}/results", horse_id),
            DocumentKey::JockeyResults { jockey_id } => format!("jockeys/{}/results", jockey_id),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Raw bytes as retrieved; cheap to clone
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub key: DocumentKey,
    pub body: Arc<[u8]>,
    pub content_type: Option<String>,
    /// Attempts the fetcher needed to obtain it
    pub attempts: u32,
}

impl RawDocument {
    pub fn new(key: DocumentKey, body: impl Into<Arc<[u8]>>, content_type: Option<String>) -> Self {
        Self {
            key,
            body: body.into(),
            content_type,
            attempts: 1,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }
}

/// Classified retrieval error
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Worth retrying: timeouts, connection errors, 429, 5xx
    #[error("transient: {0}")]
    Transient(String),
    /// Retrying cannot help: other 4xx, malformed responses
    #[error("permanent: {0}")]
    Permanent(String),
}

impl SourceError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, url: &str) -> Self {
        let message = format!("HTTP {} from {}", status, url);
        match status {
            429 | 500..=599 => SourceError::Transient(message),
            _ => SourceError::Permanent(message),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            SourceError::Transient(m) | SourceError::Permanent(m) => m,
        }
    }
}

/// Upstream document retrieval
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Retrieve one document; a single attempt, no retries
    async fn retrieve(&self, key: &DocumentKey) -> Result<RawDocument, SourceError>;

    /// Location reported in failures (a URL for HTTP sources)
    fn locate(&self, key: &DocumentKey) -> String {
        key.path()
    }
}
