//! Retrying, deduplicating, cancellable fetcher

use futures::future::{join_all, FutureExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{DocumentKey, DocumentSource, RawDocument, RetryPolicy, SingleFlight, SourceError};
use crate::types::FetchFailure;

pub type FetchResult = Result<RawDocument, FetchFailure>;

/// Wraps a [`DocumentSource`] with retry, single-flight and cancellation
pub struct Fetcher {
    source: Arc<dyn DocumentSource>,
    policy: RetryPolicy,
    flights: SingleFlight<DocumentKey, FetchResult>,
}

impl Fetcher {
    pub fn new(source: Arc<dyn DocumentSource>, policy: RetryPolicy) -> Self {
        Self {
            source,
            policy,
            flights: SingleFlight::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch one document
    ///
    /// Concurrent calls for the same key share a single retrieval. A caller
    /// whose token fires stops waiting and gets a `cancelled` failure; the
    /// retrieval carries on for the remaining callers and is abandoned only
    /// when none are left.
    pub async fn fetch(&self, key: &DocumentKey, cancel: &CancellationToken) -> FetchResult {
        if cancel.is_cancelled() {
            return Err(FetchFailure::cancelled(self.source.locate(key), 0));
        }

        let start = {
            let source = Arc::clone(&self.source);
            let policy = self.policy.clone();
            let key = key.clone();
            move |flight: CancellationToken| {
                async move { fetch_with_retry(source.as_ref(), &policy, &key, &flight).await }
                    .boxed()
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchFailure::cancelled(self.source.locate(key), 0)),
            (result, leader) = self.flights.run(key.clone(), start) => {
                if !leader {
                    debug!(document = %key, "Joined in-flight fetch");
                }
                result
            }
        }
    }

    /// Fetch independent documents concurrently; results keep input order
    pub async fn fetch_many(
        &self,
        keys: &[DocumentKey],
        cancel: &CancellationToken,
    ) -> Vec<(DocumentKey, FetchResult)> {
        let results = join_all(keys.iter().map(|key| self.fetch(key, cancel))).await;
        keys.iter().cloned().zip(results).collect()
    }
}

/// Attempt loop for one document
async fn fetch_with_retry(
    source: &dyn DocumentSource,
    policy: &RetryPolicy,
    key: &DocumentKey,
    cancel: &CancellationToken,
) -> FetchResult {
    let url = source.locate(key);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchFailure::cancelled(url, attempt)),
            result = source.retrieve(key) => result,
        };

        let error = match result {
            Ok(mut document) => {
                if attempt > 1 {
                    debug!(document = %key, attempt, "Fetch succeeded after retry");
                }
                document.attempts = attempt;
                return Ok(document);
            }
            Err(error) => error,
        };

        match error {
            SourceError::Permanent(reason) => {
                warn!(document = %key, attempt, %reason, "Permanent fetch failure");
                return Err(FetchFailure {
                    reason,
                    url,
                    attempts: attempt,
                });
            }
            SourceError::Transient(reason) if !policy.should_retry(attempt) => {
                warn!(document = %key, attempt, %reason, "Fetch retries exhausted");
                return Err(FetchFailure {
                    reason,
                    url,
                    attempts: attempt,
                });
            }
            SourceError::Transient(reason) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    document = %key,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    %reason,
                    "Transient fetch failure, will retry after backoff"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FetchFailure::cancelled(url, attempt)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
