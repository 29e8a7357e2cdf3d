use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tracked subscription, either detected in a mailbox or entered by hand.
///
/// Field names follow the camelCase shape the web client consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    /// Canonical display name; unique per user.
    pub name: String,
    pub price: f64,
    pub billing_cycle: BillingCycle,
    pub next_billing_date: NaiveDate,
    pub category: SubscriptionCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub is_auto_detected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Monthly,
    #[serde(alias = "yearly")]
    Annual,
    Unknown,
}

impl BillingCycle {
    pub fn as_str(&self) -> &str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Annual => "annual",
            BillingCycle::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionCategory {
    Streaming,
    Productivity,
    Development,
    Ai,
    Other,
}

impl SubscriptionCategory {
    pub fn as_str(&self) -> &str {
        match self {
            SubscriptionCategory::Streaming => "streaming",
            SubscriptionCategory::Productivity => "productivity",
            SubscriptionCategory::Development => "development",
            SubscriptionCategory::Ai => "ai",
            SubscriptionCategory::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "streaming" => Some(SubscriptionCategory::Streaming),
            "productivity" => Some(SubscriptionCategory::Productivity),
            "development" => Some(SubscriptionCategory::Development),
            "ai" => Some(SubscriptionCategory::Ai),
            "other" => Some(SubscriptionCategory::Other),
            _ => None,
        }
    }
}

// ============================================================================
// API Request/Response types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionListResponse {
    pub subscriptions: Vec<Subscription>,
    pub total: usize,
}

impl From<Vec<Subscription>> for SubscriptionListResponse {
    fn from(subscriptions: Vec<Subscription>) -> Self {
        SubscriptionListResponse {
            total: subscriptions.len(),
            subscriptions,
        }
    }
}

/// Generic acknowledgement body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        ActionResponse {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailConnectRequest {
    pub email: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailConnectResponse {
    pub auth_url: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailCallbackRequest {
    pub code: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailCallbackResponse {
    pub success: bool,
    pub email: String,
    /// Identifier of the background scan started for the linked mailbox
    pub scan_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStartedResponse {
    pub success: bool,
    pub message: String,
    pub scan_id: Uuid,
}
