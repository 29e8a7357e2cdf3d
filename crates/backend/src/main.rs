use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

mod config;
pub mod error;
mod extractor;
mod handlers;
mod mailbox;
mod oauth;
mod routes;
mod scanner;
mod store;

use config::AppConfig;
use oauth::{GmailOAuth, LinkedAccounts, OAuthConfig};
use routes::AppState;
use scanner::{ScanEvent, ScanOrchestrator, ScanScheduler};
use store::{InMemoryStore, SubscriptionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env();
    tracing::info!(
        "Scan config: {} queries, {} results per query, {} concurrent fetches",
        config.scan.queries.len(),
        config.scan.max_results_per_query,
        config.scan.fetch_concurrency
    );

    let oauth = match OAuthConfig::from_env() {
        Ok(oauth_config) => Some(Arc::new(GmailOAuth::new(oauth_config))),
        Err(e) => {
            tracing::warn!("Gmail linking disabled: {}", e);
            None
        }
    };

    let store: Arc<dyn SubscriptionStore> = Arc::new(InMemoryStore::new());
    let scanner = ScanScheduler::new(ScanOrchestrator::new(store.clone(), config.scan.clone()));
    spawn_scan_event_logger(&scanner);

    let state = AppState {
        store,
        scanner,
        oauth,
        accounts: Arc::new(LinkedAccounts::new()),
        frontend_url: config.frontend_url.clone(),
    };

    let app = routes::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

/// Log scan lifecycle events until the scheduler goes away.
fn spawn_scan_event_logger(scanner: &ScanScheduler) {
    let mut events = scanner.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ScanEvent::Started { scan_id, user }) => {
                    tracing::debug!("Scan {} started for {}", scan_id, user);
                }
                Ok(ScanEvent::SubscriptionFound { scan_id, name, price, confidence, .. }) => {
                    tracing::debug!(
                        "Scan {} matched {} (${:.2}, confidence {:.2})",
                        scan_id,
                        name,
                        price,
                        confidence
                    );
                }
                Ok(ScanEvent::Completed { scan_id, user, report }) => {
                    tracing::info!(
                        "Scan {} for {} completed: {} stored, {} fetch failures, {} store failures",
                        scan_id,
                        user,
                        report.subscriptions_stored,
                        report.fetch_failures,
                        report.store_failures
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Scan event logger skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
