//! Subscription detection for a single fetched message.
//!
//! Matching is a case-insensitive substring test of a fixed keyword table
//! against `body + subject + sender`. The table is ordered and the first hit
//! wins, so a message naming several services always maps to the same one.
//!
//! Prices and dates are not parsed from the message: every detected
//! subscription gets [`PLACEHOLDER_PRICE`], a monthly cycle, and a next billing
//! date one month out.

use chrono::{DateTime, Months, NaiveDate, Utc};
use shared_types::{BillingCycle, Subscription, SubscriptionCategory};
use uuid::Uuid;

use crate::mailbox::RawMessage;

pub const PLACEHOLDER_PRICE: f64 = 9.99;

/// One row of the keyword table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordRule {
    pub keyword: &'static str,
    pub name: &'static str,
    pub category: SubscriptionCategory,
}

/// Known services, in match priority order
pub const SUBSCRIPTION_KEYWORDS: &[KeywordRule] = &[
    KeywordRule {
        keyword: "netflix",
        name: "Netflix",
        category: SubscriptionCategory::Streaming,
    },
    KeywordRule {
        keyword: "spotify",
        name: "Spotify",
        category: SubscriptionCategory::Streaming,
    },
    KeywordRule {
        keyword: "adobe",
        name: "Adobe Creative Cloud",
        category: SubscriptionCategory::Productivity,
    },
    KeywordRule {
        keyword: "youtube",
        name: "YouTube Premium",
        category: SubscriptionCategory::Streaming,
    },
    KeywordRule {
        keyword: "github",
        name: "GitHub",
        category: SubscriptionCategory::Development,
    },
    KeywordRule {
        keyword: "chatgpt",
        name: "ChatGPT Plus",
        category: SubscriptionCategory::Ai,
    },
];

/// Terms that make a keyword hit look more like a bill
const BILLING_TERMS: &[&str] = &[
    "receipt",
    "invoice",
    "subscription",
    "renewal",
    "payment",
    "billing",
];

/// Where the winning keyword was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    Subject,
    Sender,
    Body,
}

/// A detected subscription plus the evidence behind it.
#[derive(Debug, Clone)]
pub struct SubscriptionCandidate {
    pub subscription: Subscription,
    pub matched_keyword: &'static str,
    pub matched_in: MatchField,
    pub confidence: f32,
}

impl SubscriptionCandidate {
    pub fn confidence_level(&self) -> &'static str {
        if self.confidence >= 0.8 {
            "high"
        } else if self.confidence >= 0.5 {
            "medium"
        } else {
            "low"
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionExtractor {
    rules: &'static [KeywordRule],
}

impl Default for SubscriptionExtractor {
    fn default() -> Self {
        Self {
            rules: SUBSCRIPTION_KEYWORDS,
        }
    }
}

impl SubscriptionExtractor {
    /// Detect a subscription in `message`, dating it relative to `now`.
    pub fn extract(&self, message: &RawMessage, now: DateTime<Utc>) -> Option<SubscriptionCandidate> {
        let body = message.body();
        let content = format!("{} {} {}", body, message.subject, message.from).to_lowercase();

        let rule = self.rules.iter().find(|r| content.contains(r.keyword))?;

        let matched_in = if message.subject.to_lowercase().contains(rule.keyword) {
            MatchField::Subject
        } else if message.from.to_lowercase().contains(rule.keyword) {
            MatchField::Sender
        } else {
            MatchField::Body
        };

        let base: f32 = match matched_in {
            MatchField::Subject => 0.9,
            MatchField::Sender => 0.8,
            MatchField::Body => 0.6,
        };
        let billing_bonus = if BILLING_TERMS.iter().any(|t| content.contains(t)) {
            0.05
        } else {
            0.0
        };

        Some(SubscriptionCandidate {
            subscription: Subscription {
                id: Uuid::new_v4(),
                name: rule.name.to_string(),
                price: PLACEHOLDER_PRICE,
                billing_cycle: BillingCycle::Monthly,
                next_billing_date: next_billing_date(now),
                category: rule.category,
                color: None,
                is_auto_detected: true,
            },
            matched_keyword: rule.keyword,
            matched_in,
            confidence: (base + billing_bonus).min(1.0),
        })
    }
}

/// One calendar month after `now`, clamped to the end of shorter months.
fn next_billing_date(now: DateTime<Utc>) -> NaiveDate {
    let today = now.date_naive();
    today.checked_add_months(Months::new(1)).unwrap_or(today)
}
