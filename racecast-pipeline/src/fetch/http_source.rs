//! HTTP document source
//!
//! Rate-limited reqwest client over the upstream's URL layout:
//! `{base}/cards/{date}`, `{base}/cards/{date}/{venue}/{n}`,
//! `{base}/horses/{id}/results`, `{base}/jockeys/{id}/results`.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use racecast_common::config::SourceConfig;
use racecast_common::{Error, Result};
use reqwest::header::CONTENT_TYPE;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

use super::{DocumentKey, DocumentSource, RawDocument, SourceError};

pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: DefaultDirectRateLimiter,
}

impl HttpSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let per_second = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
            Error::Config("sources.requests_per_second must be at least 1".to_string())
        })?;

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Transport errors are transient unless the request itself was malformed
fn classify(err: reqwest::Error, url: &str) -> SourceError {
    let message = format!("{} ({})", err, url);
    if err.is_builder() || err.is_redirect() {
        SourceError::Permanent(message)
    } else {
        SourceError::Transient(message)
    }
}

#[async_trait]
impl DocumentSource for HttpSource {
    async fn retrieve(&self, key: &DocumentKey) -> std::result::Result<RawDocument, SourceError> {
        self.rate_limiter.until_ready().await;

        let url = self.locate(key);
        debug!(%url, "GET");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify(e, &url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::from_status(status.as_u16(), &url));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.bytes().await.map_err(|e| classify(e, &url))?;
        if body.is_empty() {
            return Err(SourceError::Permanent(format!("empty body from {}", url)));
        }

        Ok(RawDocument::new(key.clone(), body.to_vec(), content_type))
    }

    fn locate(&self, key: &DocumentKey) -> String {
        format!("{}/{}", self.base_url, key.path())
    }
}
