use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use super::{ScanEvent, ScanOrchestrator};
use crate::mailbox::MessageSource;

/// Acknowledgement that a scan was scheduled; carries no result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTicket {
    pub scan_id: Uuid,
    pub user: String,
}

/// Starts scans as detached tokio tasks.
///
/// At most one scan per user runs at a time: a scan triggered while another
/// one for the same user is in flight waits for it before starting. Scans for
/// different users run in parallel. A user's lock entry is dropped once no
/// scan for that user is running or waiting.
#[derive(Clone)]
pub struct ScanScheduler {
    orchestrator: Arc<ScanOrchestrator>,
    user_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ScanScheduler {
    pub fn new(orchestrator: ScanOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            user_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.orchestrator.subscribe()
    }

    fn user_lock(&self, user: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.user_locks.entry(user.to_string()).or_default().value())
    }

    /// Schedule a scan of `source` for `user` and return immediately.
    pub fn trigger_scan(&self, user: &str, source: Arc<dyn MessageSource>) -> ScanTicket {
        let ticket = ScanTicket {
            scan_id: Uuid::new_v4(),
            user: user.to_string(),
        };

        let orchestrator = Arc::clone(&self.orchestrator);
        let user_locks = Arc::clone(&self.user_locks);
        let lock = self.user_lock(user);
        let scan_id = ticket.scan_id;
        let user = ticket.user.clone();

        tokio::spawn(async move {
            if lock.try_lock().is_err() {
                tracing::info!("Scan {} for {} queued behind a running scan", scan_id, user);
            }
            {
                let _guard = lock.lock().await;
                orchestrator.run_scan(scan_id, &user, source.as_ref()).await;
            }

            // Map entry plus this task: nobody else is running or waiting
            user_locks.remove_if(&user, |_, entry| {
                Arc::ptr_eq(entry, &lock) && Arc::strong_count(entry) == 2
            });
        });

        tracing::debug!("Scheduled scan {} for {}", ticket.scan_id, ticket.user);
        ticket
    }
}
