use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tokio::time::Instant;
use uuid::Uuid;

use super::{ScanEvent, ScanReport};
use crate::config::ScanConfig;
use crate::extractor::{SubscriptionCandidate, SubscriptionExtractor};
use crate::mailbox::MessageSource;
use crate::store::SubscriptionStore;

const EVENT_CAPACITY: usize = 256;

/// Runs one scan at a time to completion; scheduling lives in
/// [`ScanScheduler`](super::ScanScheduler).
pub struct ScanOrchestrator {
    store: Arc<dyn SubscriptionStore>,
    config: ScanConfig,
    extractor: SubscriptionExtractor,
    events: broadcast::Sender<ScanEvent>,
}

impl ScanOrchestrator {
    pub fn new(store: Arc<dyn SubscriptionStore>, config: ScanConfig) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            config,
            extractor: SubscriptionExtractor::default(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: ScanEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Scan `source` on behalf of `user` and write what was found.
    ///
    /// Never fails: unreachable queries and messages are skipped, store write
    /// failures are logged, and everything else found is still committed.
    pub async fn run_scan(&self, scan_id: Uuid, user: &str, source: &dyn MessageSource) -> ScanReport {
        let started = Instant::now();
        let deadline = self.config.deadline.map(|d| started + d);
        let past_deadline = || deadline.is_some_and(|d| Instant::now() >= d);
        let now = Utc::now();

        self.publish(ScanEvent::Started {
            scan_id,
            user: user.to_string(),
        });
        tracing::info!("Starting mailbox scan {} for {}", scan_id, user);

        let mut report = ScanReport::default();
        // Keyed by canonical name; a later match replaces an earlier one
        let mut session: BTreeMap<String, SubscriptionCandidate> = BTreeMap::new();

        'queries: for query in &self.config.queries {
            if past_deadline() {
                report.deadline_exceeded = true;
                break;
            }

            report.queries_issued += 1;
            let search = source.search(query, self.config.max_results_per_query);
            let ids = match within_deadline(deadline, search).await {
                None => {
                    report.deadline_exceeded = true;
                    break;
                }
                Some(Ok(ids)) => ids,
                Some(Err(e)) => {
                    report.queries_failed += 1;
                    tracing::warn!("Skipping query '{}': {}", query, e);
                    continue;
                }
            };
            tracing::debug!("Query '{}' matched {} messages", query, ids.len());

            let mut fetches = stream::iter(ids)
                .map(|id| async move {
                    let result = source.fetch(&id).await;
                    (id, result)
                })
                .buffered(self.config.fetch_concurrency.max(1));

            loop {
                let (id, result) = match within_deadline(deadline, fetches.next()).await {
                    None => {
                        report.deadline_exceeded = true;
                        break 'queries;
                    }
                    Some(None) => break,
                    Some(Some(fetched)) => fetched,
                };

                match result {
                    Ok(message) => {
                        report.messages_fetched += 1;
                        if let Some(candidate) = self.extractor.extract(&message, now) {
                            tracing::debug!(
                                "  Message {} looks like {} (keyword '{}', confidence {:.2})",
                                id,
                                candidate.subscription.name,
                                candidate.matched_keyword,
                                candidate.confidence
                            );
                            report.candidates_matched += 1;
                            session.insert(candidate.subscription.name.clone(), candidate);
                        }
                    }
                    Err(e) => {
                        report.fetch_failures += 1;
                        tracing::warn!("  Failed to fetch message {}: {}", id, e);
                    }
                }

                if past_deadline() {
                    report.deadline_exceeded = true;
                    break 'queries;
                }
            }
        }

        if report.deadline_exceeded {
            tracing::warn!(
                "Scan {} hit its deadline after {:?}, keeping {} subscriptions found so far",
                scan_id,
                started.elapsed(),
                session.len()
            );
        }

        report.distinct_subscriptions = session.len();
        self.flush(scan_id, user, session, &mut report).await;

        tracing::info!(
            "Finished scanning mailbox for {}. Found {} subscriptions",
            user,
            report.distinct_subscriptions
        );
        self.publish(ScanEvent::Completed {
            scan_id,
            user: user.to_string(),
            report: report.clone(),
        });

        report
    }

    async fn flush(
        &self,
        scan_id: Uuid,
        user: &str,
        session: BTreeMap<String, SubscriptionCandidate>,
        report: &mut ScanReport,
    ) {
        for candidate in session.into_values() {
            let (confidence, level) = (candidate.confidence, candidate.confidence_level());
            let subscription = candidate.subscription;
            let (name, price) = (subscription.name.clone(), subscription.price);

            match self.store.upsert(user, subscription).await {
                Ok(()) => {
                    report.subscriptions_stored += 1;
                    tracing::info!(
                        "Found subscription: {} - ${:.2} ({} confidence)",
                        name,
                        price,
                        level
                    );
                    self.publish(ScanEvent::SubscriptionFound {
                        scan_id,
                        user: user.to_string(),
                        name,
                        price,
                        confidence,
                    });
                }
                Err(e) => {
                    report.store_failures += 1;
                    tracing::error!("Failed to store subscription {} for {}: {}", name, user, e);
                }
            }
        }
    }
}

/// Await `fut`, giving up once `deadline` passes. `None` means it was cut off.
async fn within_deadline<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::fake::FakeMailbox;
    use crate::store::{InMemoryStore, StoreError};
    use async_trait::async_trait;
    use shared_types::{Subscription, SubscriptionCategory};
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    const BILLING_QUERY: &str = "subject:receipt";
    const SENDER_QUERY: &str = "from:billing";

    fn config() -> ScanConfig {
        ScanConfig {
            queries: vec![BILLING_QUERY.to_string(), SENDER_QUERY.to_string()],
            ..ScanConfig::default()
        }
    }

    fn orchestrator(store: Arc<dyn SubscriptionStore>, config: ScanConfig) -> ScanOrchestrator {
        ScanOrchestrator::new(store, config)
    }

    fn names(subscriptions: &[Subscription]) -> Vec<&str> {
        let mut names: Vec<&str> = subscriptions.iter().map(|s| s.name.as_str()).collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_duplicate_mentions_collapse_to_one_record() {
        let mailbox = FakeMailbox::new()
            .with_query(BILLING_QUERY, &["m1", "m2"])
            .with_query(SENDER_QUERY, &["m3"])
            .with_message("m1", "Your Netflix receipt", "info@mailer.example", "Thanks")
            .with_message("m2", "Netflix: payment received", "info@mailer.example", "")
            .with_message("m3", "Your receipt", "Spotify <no-reply@spotify.com>", "");
        let store = Arc::new(InMemoryStore::new());

        let report = orchestrator(store.clone(), config())
            .run_scan(Uuid::new_v4(), "alice", &mailbox)
            .await;

        let records = store.list("alice").await.unwrap();
        assert_eq!(names(&records), vec!["Netflix", "Spotify"]);
        assert!(records
            .iter()
            .all(|s| s.category == SubscriptionCategory::Streaming && s.is_auto_detected));
        assert_eq!(report.messages_fetched, 3);
        assert_eq!(report.candidates_matched, 3);
        assert_eq!(report.distinct_subscriptions, 2);
        assert_eq!(report.subscriptions_stored, 2);
    }

    #[tokio::test]
    async fn test_empty_query_adds_nothing() {
        let mailbox = FakeMailbox::new().with_query(BILLING_QUERY, &[]);
        let store = Arc::new(InMemoryStore::new());

        let report = orchestrator(store.clone(), config())
            .run_scan(Uuid::new_v4(), "alice", &mailbox)
            .await;

        assert!(store.list("alice").await.unwrap().is_empty());
        assert_eq!(report.queries_issued, 2);
        assert_eq!(report.queries_failed, 0);
        assert_eq!(report.messages_fetched, 0);
        assert_eq!(mailbox.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_does_not_stop_the_query() {
        let mailbox = FakeMailbox::new()
            .with_query(BILLING_QUERY, &["m1", "m2", "m3", "m4", "m5"])
            .with_message("m1", "Netflix receipt", "", "")
            .with_message("m2", "Spotify receipt", "", "")
            .with_message("m3", "Adobe invoice", "", "")
            .with_message("m4", "GitHub receipt", "", "")
            .with_message("m5", "ChatGPT Plus renewal", "", "")
            .with_failing_fetch("m3");
        let store = Arc::new(InMemoryStore::new());

        let report = orchestrator(store.clone(), config())
            .run_scan(Uuid::new_v4(), "alice", &mailbox)
            .await;

        let records = store.list("alice").await.unwrap();
        assert_eq!(
            names(&records),
            vec!["ChatGPT Plus", "GitHub", "Netflix", "Spotify"]
        );
        assert_eq!(report.fetch_failures, 1);
        assert_eq!(report.messages_fetched, 4);
        assert_eq!(mailbox.fetch_count(), 5);
    }

    #[tokio::test]
    async fn test_failed_query_is_skipped() {
        let mailbox = FakeMailbox::new()
            .with_failing_query(BILLING_QUERY)
            .with_query(SENDER_QUERY, &["m1"])
            .with_message("m1", "Receipt", "billing@github.com", "");
        let store = Arc::new(InMemoryStore::new());

        let report = orchestrator(store.clone(), config())
            .run_scan(Uuid::new_v4(), "alice", &mailbox)
            .await;

        assert_eq!(report.queries_failed, 1);
        assert_eq!(names(&store.list("alice").await.unwrap()), vec!["GitHub"]);
    }

    #[tokio::test]
    async fn test_missing_message_counts_as_fetch_failure() {
        let mailbox = FakeMailbox::new()
            .with_query(BILLING_QUERY, &["gone", "m1"])
            .with_message("m1", "YouTube Premium receipt", "", "");
        let store = Arc::new(InMemoryStore::new());

        let report = orchestrator(store.clone(), config())
            .run_scan(Uuid::new_v4(), "alice", &mailbox)
            .await;

        assert_eq!(report.fetch_failures, 1);
        assert_eq!(
            names(&store.list("alice").await.unwrap()),
            vec!["YouTube Premium"]
        );
    }

    #[tokio::test]
    async fn test_matches_across_queries_collapse_by_name() {
        let mailbox = FakeMailbox::new()
            .with_query(BILLING_QUERY, &["m1"])
            .with_query(SENDER_QUERY, &["m2"])
            .with_message("m1", "Netflix receipt", "", "")
            .with_message("m2", "Hello", "netflix@mailer.example", "");
        let store = Arc::new(InMemoryStore::new());
        let scanner = orchestrator(store.clone(), config());
        let mut events = scanner.subscribe();

        let report = scanner.run_scan(Uuid::new_v4(), "alice", &mailbox).await;

        assert_eq!(report.candidates_matched, 2);
        let mut found = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ScanEvent::SubscriptionFound { name, .. } = event {
                found.push(name);
            }
        }
        assert_eq!(found, vec!["Netflix"]);
        assert_eq!(store.list("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_results_respect_max_results_per_query() {
        let mailbox = FakeMailbox::new()
            .with_query(BILLING_QUERY, &["m1", "m2"])
            .with_message("m1", "Netflix receipt", "", "")
            .with_message("m2", "Spotify receipt", "", "");
        let store = Arc::new(InMemoryStore::new());
        let config = ScanConfig {
            max_results_per_query: 1,
            ..config()
        };

        orchestrator(store.clone(), config)
            .run_scan(Uuid::new_v4(), "alice", &mailbox)
            .await;

        assert_eq!(names(&store.list("alice").await.unwrap()), vec!["Netflix"]);
    }

    #[tokio::test]
    async fn test_zero_deadline_issues_no_queries() {
        let mailbox = FakeMailbox::new()
            .with_query(BILLING_QUERY, &["m1"])
            .with_message("m1", "Netflix receipt", "", "");
        let store = Arc::new(InMemoryStore::new());
        let config = ScanConfig {
            deadline: Some(Duration::ZERO),
            ..config()
        };

        let report = orchestrator(store.clone(), config)
            .run_scan(Uuid::new_v4(), "alice", &mailbox)
            .await;

        assert!(report.deadline_exceeded);
        assert_eq!(report.queries_issued, 0);
        assert!(store.list("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deadline_flushes_what_was_found() {
        let ids: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let mut mailbox = FakeMailbox::new()
            .with_query(BILLING_QUERY, &id_refs)
            .with_fetch_delay(Duration::from_millis(20));
        for id in &ids {
            mailbox = mailbox.with_message(id, "Netflix receipt", "", "");
        }
        let store = Arc::new(InMemoryStore::new());
        let config = ScanConfig {
            fetch_concurrency: 1,
            deadline: Some(Duration::from_millis(30)),
            ..config()
        };

        let report = orchestrator(store.clone(), config)
            .run_scan(Uuid::new_v4(), "alice", &mailbox)
            .await;

        assert!(report.deadline_exceeded);
        assert!(report.messages_fetched >= 1 && report.messages_fetched < 10);
        assert_eq!(names(&store.list("alice").await.unwrap()), vec!["Netflix"]);
    }

    #[tokio::test]
    async fn test_deadline_cuts_off_a_hung_fetch() {
        let mailbox = FakeMailbox::new()
            .with_query(BILLING_QUERY, &["m1", "m2"])
            .with_message("m1", "Netflix receipt", "", "")
            .with_message("m2", "Spotify receipt", "", "")
            .with_message_delay("m2", Duration::from_millis(1500));
        let store = Arc::new(InMemoryStore::new());
        let config = ScanConfig {
            fetch_concurrency: 1,
            deadline: Some(Duration::from_millis(100)),
            ..config()
        };

        let started = std::time::Instant::now();
        let report = orchestrator(store.clone(), config)
            .run_scan(Uuid::new_v4(), "alice", &mailbox)
            .await;

        assert!(started.elapsed() < Duration::from_millis(1000));
        assert!(report.deadline_exceeded);
        assert_eq!(report.messages_fetched, 1);
        assert_eq!(report.queries_issued, 1);
        assert_eq!(names(&store.list("alice").await.unwrap()), vec!["Netflix"]);
    }

    #[tokio::test]
    async fn test_deadline_cuts_off_a_hung_search() {
        let mailbox = FakeMailbox::new()
            .with_query(BILLING_QUERY, &["m1"])
            .with_message("m1", "Netflix receipt", "", "")
            .with_search_delay(Duration::from_millis(1500));
        let store = Arc::new(InMemoryStore::new());
        let config = ScanConfig {
            deadline: Some(Duration::from_millis(100)),
            ..config()
        };

        let started = std::time::Instant::now();
        let report = orchestrator(store.clone(), config)
            .run_scan(Uuid::new_v4(), "alice", &mailbox)
            .await;

        assert!(started.elapsed() < Duration::from_millis(1000));
        assert!(report.deadline_exceeded);
        assert_eq!(report.queries_issued, 1);
        assert_eq!(mailbox.fetch_count(), 0);
        assert!(store.list("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetches_apply_in_search_order() {
        // m1 finishes last but was listed first, so m2's match must win
        let mailbox = FakeMailbox::new()
            .with_query(BILLING_QUERY, &["m1", "m2"])
            .with_message("m1", "Netflix", "", "")
            .with_message("m2", "Hello", "", "your netflix plan")
            .with_message_delay("m1", Duration::from_millis(80));
        let store = Arc::new(InMemoryStore::new());
        let config = ScanConfig {
            queries: vec![BILLING_QUERY.to_string()],
            fetch_concurrency: 2,
            ..ScanConfig::default()
        };
        let orchestrator = orchestrator(store.clone(), config);
        let mut events = orchestrator.subscribe();

        orchestrator
            .run_scan(Uuid::new_v4(), "alice", &mailbox)
            .await;

        let mut found = Vec::new();
        loop {
            match events.try_recv() {
                Ok(ScanEvent::SubscriptionFound { name, confidence, .. }) => {
                    found.push((name, confidence))
                }
                Ok(_) => continue,
                Err(TryRecvError::Empty) => break,
                Err(e) => panic!("unexpected event error: {e}"),
            }
        }

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "Netflix");
        // Body match, not the subject match from m1
        assert!(found[0].1 < 0.8, "confidence was {}", found[0].1);
    }

    /// Rejects writes for one subscription name
    struct FlakyStore {
        inner: InMemoryStore,
        reject: &'static str,
    }

    #[async_trait]
    impl SubscriptionStore for FlakyStore {
        async fn upsert(&self, user: &str, subscription: Subscription) -> Result<(), StoreError> {
            if subscription.name == self.reject {
                return Err(StoreError::Write {
                    name: subscription.name,
                    reason: "disk full".to_string(),
                });
            }
            self.inner.upsert(user, subscription).await
        }

        async fn list(&self, user: &str) -> Result<Vec<Subscription>, StoreError> {
            self.inner.list(user).await
        }

        async fn get(&self, user: &str, id: Uuid) -> Result<Option<Subscription>, StoreError> {
            self.inner.get(user, id).await
        }

        async fn delete(&self, user: &str, id: Uuid) -> Result<bool, StoreError> {
            self.inner.delete(user, id).await
        }
    }

    #[tokio::test]
    async fn test_store_failure_does_not_block_other_writes() {
        let mailbox = FakeMailbox::new()
            .with_query(BILLING_QUERY, &["m1", "m2"])
            .with_message("m1", "Netflix receipt", "", "")
            .with_message("m2", "Spotify receipt", "", "");
        let store = Arc::new(FlakyStore {
            inner: InMemoryStore::new(),
            reject: "Netflix",
        });

        let report = orchestrator(store.clone(), config())
            .run_scan(Uuid::new_v4(), "alice", &mailbox)
            .await;

        assert_eq!(report.store_failures, 1);
        assert_eq!(report.subscriptions_stored, 1);
        assert_eq!(names(&store.list("alice").await.unwrap()), vec!["Spotify"]);
    }
}
