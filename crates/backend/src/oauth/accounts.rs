//! Linked mailboxes per user.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone)]
pub struct LinkedMailbox {
    pub email: String,
    pub refresh_token: String,
    pub linked_at: DateTime<Utc>,
}

/// Refresh tokens of linked mailboxes, kept in process memory
#[derive(Default)]
pub struct LinkedAccounts {
    accounts: DashMap<String, LinkedMailbox>,
}

impl LinkedAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the mailbox `user` just linked, replacing any earlier one.
    pub fn save(&self, user: &str, email: &str, refresh_token: &str) {
        self.accounts.insert(
            user.to_string(),
            LinkedMailbox {
                email: email.to_string(),
                refresh_token: refresh_token.to_string(),
                linked_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, user: &str) -> Option<LinkedMailbox> {
        self.accounts.get(user).map(|a| a.value().clone())
    }

    /// Forget the linked mailbox. Returns whether one was linked.
    pub fn remove(&self, user: &str) -> bool {
        self.accounts.remove(user).is_some()
    }
}
