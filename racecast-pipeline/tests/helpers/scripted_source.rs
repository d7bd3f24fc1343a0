//! Scripted in-memory document source
//!
//! Each document path can carry a queue of scripted replies (transient
//! failure, permanent failure, hang, body); once the queue is empty the
//! registered document is served, or a permanent 404 if none exists.

use async_trait::async_trait;
use racecast_pipeline::fetch::{DocumentKey, DocumentSource, RawDocument, SourceError};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted response
#[derive(Debug, Clone)]
pub enum Reply {
    Body(String),
    Transient,
    Permanent,
    /// Never answers; only cancellation ends the wait
    Hang,
}

#[derive(Default)]
pub struct ScriptedSource {
    documents: Mutex<HashMap<String, String>>,
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<HashMap<String, u32>>,
    delay: Duration,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every retrieval, so concurrent callers overlap
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn document(&self, key: &DocumentKey, body: impl Into<String>) {
        self.documents.lock().unwrap().insert(key.path(), body.into());
    }

    pub fn remove_document(&self, key: &DocumentKey) {
        self.documents.lock().unwrap().remove(&key.path());
    }

    /// Replies served before the registered document
    pub fn script(&self, key: &DocumentKey, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(key.path(), replies.into_iter().collect());
    }

    /// Retrievals of one document so far
    pub fn calls(&self, key: &DocumentKey) -> u32 {
        self.calls.lock().unwrap().get(&key.path()).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl DocumentSource for ScriptedSource {
    async fn retrieve(&self, key: &DocumentKey) -> Result<RawDocument, SourceError> {
        let path = key.path();
        *self.calls.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&path)
            .and_then(VecDeque::pop_front);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let body = match scripted {
            Some(Reply::Transient) => {
                return Err(SourceError::Transient(format!("HTTP 503 for {}", path)))
            }
            Some(Reply::Permanent) => {
                return Err(SourceError::Permanent(format!("HTTP 404 for {}", path)))
            }
            Some(Reply::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Some(Reply::Body(body)) => body,
            None => self
                .documents
                .lock()
                .unwrap()
                .get(&path)
                .cloned()
                .ok_or_else(|| SourceError::Permanent(format!("HTTP 404 for {}", path)))?,
        };

        Ok(RawDocument::new(
            key.clone(),
            body.into_bytes(),
            Some("application/json".to_string()),
        ))
    }
}
