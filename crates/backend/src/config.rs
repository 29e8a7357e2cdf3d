//! Runtime configuration loaded from environment variables.

use std::time::Duration;

/// Gmail search queries issued by every scan, in order
pub const DEFAULT_SCAN_QUERIES: &[&str] = &[
    "subject:(receipt OR invoice OR subscription OR renewal OR payment)",
    "from:(noreply OR no-reply OR billing OR subscriptions)",
];

/// Configuration for mailbox scans
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub queries: Vec<String>,
    /// Maximum message ids taken from each query
    pub max_results_per_query: u32,
    /// Message fetches in flight at once within a query
    pub fetch_concurrency: usize,
    /// Stop issuing requests after this long and keep what was found
    pub deadline: Option<Duration>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            queries: DEFAULT_SCAN_QUERIES.iter().map(|q| q.to_string()).collect(),
            max_results_per_query: 100,
            fetch_concurrency: 4,
            deadline: None,
        }
    }
}

impl ScanConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let queries = std::env::var("SCAN_QUERIES")
            .ok()
            .map(|s| parse_queries(&s))
            .filter(|q| !q.is_empty())
            .unwrap_or(defaults.queries);

        let max_results_per_query = std::env::var("SCAN_MAX_RESULTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_results_per_query);

        let fetch_concurrency = std::env::var("SCAN_FETCH_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults.fetch_concurrency);

        let deadline = std::env::var("SCAN_DEADLINE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs);

        Self {
            queries,
            max_results_per_query,
            fetch_concurrency,
            deadline,
        }
    }
}

fn parse_queries(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect()
}

/// Server-level settings
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// Where OAuth redirect flows send the browser back to
    pub frontend_url: String,
    pub scan: ScanConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080);

        let frontend_url = std::env::var("FRONTEND_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "http://localhost:3000".to_string());

        Self {
            port,
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
            scan: ScanConfig::from_env(),
        }
    }
}
