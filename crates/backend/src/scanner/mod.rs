//! Background mailbox scans.
//!
//! A scan runs every configured search query against a [`MessageSource`],
//! feeds each fetched message to the extractor, collapses detections by
//! subscription name and writes the survivors to the store. Scans are started
//! with [`ScanScheduler::trigger_scan`] and run detached from the request that
//! asked for them; their outcome is visible only in the store, the logs and
//! the [`ScanEvent`] stream.
//!
//! [`MessageSource`]: crate::mailbox::MessageSource

use uuid::Uuid;

mod orchestrator;
mod scheduler;

pub use orchestrator::ScanOrchestrator;
pub use scheduler::{ScanScheduler, ScanTicket};

/// Counters for one scan run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub queries_issued: usize,
    pub queries_failed: usize,
    pub messages_fetched: usize,
    pub fetch_failures: usize,
    pub candidates_matched: usize,
    /// Distinct subscription names left after in-scan deduplication
    pub distinct_subscriptions: usize,
    pub subscriptions_stored: usize,
    pub store_failures: usize,
    pub deadline_exceeded: bool,
}

/// Progress notifications published while scans run
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Started {
        scan_id: Uuid,
        user: String,
    },
    SubscriptionFound {
        scan_id: Uuid,
        user: String,
        name: String,
        price: f64,
        confidence: f32,
    },
    Completed {
        scan_id: Uuid,
        user: String,
        report: ScanReport,
    },
}
