//! In-memory mailbox for scanner tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use super::{MessageBody, MessageId, MessageSource, RawMessage, SourceError};

#[derive(Default)]
pub struct FakeMailbox {
    queries: HashMap<String, Vec<MessageId>>,
    failing_queries: HashSet<String>,
    messages: HashMap<MessageId, RawMessage>,
    failing_fetches: HashSet<MessageId>,
    fetch_delay: Option<Duration>,
    message_delays: HashMap<MessageId, Duration>,
    search_delay: Option<Duration>,
    fetches: AtomicUsize,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, query: &str, ids: &[&str]) -> Self {
        self.queries
            .insert(query.to_string(), ids.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_failing_query(mut self, query: &str) -> Self {
        self.failing_queries.insert(query.to_string());
        self
    }

    /// Add a message whose body is carried base64url-encoded, like Gmail's JSON.
    pub fn with_message(mut self, id: &str, subject: &str, from: &str, body: &str) -> Self {
        let encoded = URL_SAFE_NO_PAD.encode(body);
        self.messages.insert(
            id.to_string(),
            RawMessage::new(id, subject, from, MessageBody::Encoded(encoded)),
        );
        self
    }

    pub fn with_raw_message(mut self, message: RawMessage) -> Self {
        self.messages.insert(message.id.clone(), message);
        self
    }

    pub fn with_failing_fetch(mut self, id: &str) -> Self {
        self.failing_fetches.insert(id.to_string());
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Delay fetching `id` only; overrides the mailbox-wide fetch delay.
    pub fn with_message_delay(mut self, id: &str, delay: Duration) -> Self {
        self.message_delays.insert(id.to_string(), delay);
        self
    }

    pub fn with_search_delay(mut self, delay: Duration) -> Self {
        self.search_delay = Some(delay);
        self
    }

    /// Number of fetch calls made so far, failed ones included
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSource for FakeMailbox {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<MessageId>, SourceError> {
        if let Some(delay) = self.search_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_queries.contains(query) {
            return Err(SourceError::Transient(format!("search failed: {query}")));
        }
        let mut ids = self.queries.get(query).cloned().unwrap_or_default();
        ids.truncate(max_results as usize);
        Ok(ids)
    }

    async fn fetch(&self, id: &str) -> Result<RawMessage, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.message_delays.get(id).copied().or(self.fetch_delay) {
            tokio::time::sleep(delay).await;
        }
        if self.failing_fetches.contains(id) {
            return Err(SourceError::Transient(format!("fetch failed: {id}")));
        }
        self.messages
            .get(id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }
}
