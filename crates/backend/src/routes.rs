use std::sync::Arc;

use axum::{
    http::{header, HeaderName, Method},
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::handlers;
use crate::oauth::{GmailOAuth, LinkedAccounts};
use crate::scanner::ScanScheduler;
use crate::store::SubscriptionStore;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SubscriptionStore>,
    pub scanner: ScanScheduler,
    /// `None` when Google credentials are not configured; Gmail routes then fail
    pub oauth: Option<Arc<GmailOAuth>>,
    pub accounts: Arc<LinkedAccounts>,
    pub frontend_url: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        // Gmail linking
        .route("/api/gmail/connect", post(handlers::gmail_connect))
        .route("/api/gmail/callback", post(handlers::gmail_callback))
        .route(
            "/api/gmail/connect/redirect",
            get(handlers::gmail_connect_redirect),
        )
        .route(
            "/api/gmail/callback/redirect",
            get(handlers::gmail_callback_redirect),
        )
        .route("/api/gmail/scan", post(handlers::gmail_scan))
        .route("/api/gmail/disconnect", delete(handlers::gmail_disconnect))
        // Subscriptions
        .route("/api/subscriptions", get(handlers::list_subscriptions))
        .route(
            "/api/subscriptions/:id",
            get(handlers::get_subscription).delete(handlers::delete_subscription),
        )
        .layer(build_cors_layer())
        .with_state(state)
}

/// Build CORS layer based on environment configuration.
///
/// If CORS_ALLOWED_ORIGINS is set, only those origins are allowed.
/// If not set, defaults to permissive CORS (for development only).
fn build_cors_layer() -> CorsLayer {
    let origins: Vec<_> = std::env::var("CORS_ALLOWED_ORIGINS")
        .unwrap_or_default()
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    if origins.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, using permissive CORS");
        return CorsLayer::permissive();
    }

    tracing::info!("CORS configured for origins: {:?}", origins);
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(handlers::USER_HEADER),
        ])
        .allow_credentials(true)
}
