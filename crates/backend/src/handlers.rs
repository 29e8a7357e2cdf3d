use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use shared_types::{
    ActionResponse, GmailCallbackRequest, GmailCallbackResponse, GmailConnectRequest,
    GmailConnectResponse, HealthResponse, ScanStartedResponse, Subscription,
    SubscriptionListResponse,
};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::mailbox::MessageSource;
use crate::oauth::{cookies, GmailOAuth, OAuthError};
use crate::routes::AppState;
use crate::scanner::ScanTicket;

/// Header carrying the caller's identity
pub const USER_HEADER: &str = "x-user-id";
pub const DEFAULT_USER: &str = "temp_user";

pub fn current_user(headers: &HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_USER)
        .to_string()
}

fn oauth(state: &AppState) -> ApiResult<&Arc<GmailOAuth>> {
    state.oauth.as_ref().ok_or_else(|| {
        ApiError::Config("GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET must be set".to_string())
    })
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

// Subscription handlers
pub async fn list_subscriptions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<SubscriptionListResponse>> {
    let user = current_user(&headers);
    let subscriptions = state.store.list(&user).await?;
    Ok(Json(subscriptions.into()))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Subscription>> {
    let user = current_user(&headers);
    state
        .store
        .get(&user, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Subscription"))
}

pub async fn delete_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ActionResponse>> {
    let user = current_user(&headers);
    if !state.store.delete(&user, id).await? {
        return Err(ApiError::not_found("Subscription"));
    }

    tracing::info!("Deleted subscription {} for {}", id, user);
    Ok(Json(ActionResponse::ok("Subscription deleted")))
}

// Gmail linking - JSON flow
pub async fn gmail_connect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GmailConnectRequest>,
) -> ApiResult<Json<GmailConnectResponse>> {
    let oauth = oauth(&state)?;
    let user = current_user(&headers);

    let email = Some(payload.email).filter(|e| !e.trim().is_empty());
    let state_token = oauth.issue_state(&user, email)?;
    tracing::debug!(
        "Starting Gmail link for {} (client return URI {})",
        user,
        payload.redirect_uri
    );

    Ok(Json(GmailConnectResponse {
        auth_url: oauth.consent_url(&state_token),
        state: state_token,
    }))
}

pub async fn gmail_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GmailCallbackRequest>,
) -> ApiResult<Json<GmailCallbackResponse>> {
    let oauth = oauth(&state)?;
    let user = current_user(&headers);

    if payload.code.is_empty() {
        return Err(ApiError::bad_request("code is required"));
    }

    let claims = oauth.verify_state(&payload.state)?;
    if claims.sub != user {
        return Err(ApiError::unauthorized("state was issued to a different user"));
    }

    let (email, ticket) = link_mailbox(&state, oauth, &user, &payload.code).await?;

    Ok(Json(GmailCallbackResponse {
        success: true,
        email,
        scan_id: ticket.scan_id,
    }))
}

// Gmail linking - browser redirect flow
pub async fn gmail_connect_redirect(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let oauth = oauth(&state)?;
    let user = current_user(&headers);

    let state_token = oauth.issue_state(&user, None)?;
    let max_age = oauth.config().state_ttl_minutes * 60;
    let cookie = cookies::build_cookie(cookies::STATE_COOKIE, &state_token, max_age);

    tracing::info!("Redirecting to Google OAuth for user: {}", user);

    Ok((
        [(header::SET_COOKIE, cookie)],
        Redirect::temporary(&oauth.consent_url(&state_token)),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct OAuthRedirectParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

pub async fn gmail_callback_redirect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<OAuthRedirectParams>,
) -> Response {
    let app_url = format!("{}/app", state.frontend_url);
    let fail = |reason: &str| {
        Redirect::temporary(&format!(
            "{}?error={}",
            app_url,
            urlencoding::encode(reason)
        ))
        .into_response()
    };

    if let Some(error) = params.error.as_deref() {
        tracing::warn!("Google returned an OAuth error: {}", error);
        return fail(error);
    }

    let (Some(code), Some(state_token)) = (
        params.code.filter(|c| !c.is_empty()),
        params.state.filter(|s| !s.is_empty()),
    ) else {
        return fail("invalid_callback");
    };

    let Some(oauth) = state.oauth.as_ref() else {
        tracing::error!("Gmail callback received but OAuth is not configured");
        return fail("gmail_service_failed");
    };

    if cookies::read_cookie(&headers, cookies::STATE_COOKIE).as_deref() != Some(state_token.as_str())
    {
        return fail("invalid_state");
    }

    let user = match oauth.verify_state(&state_token) {
        Ok(claims) => claims.sub,
        Err(e) => {
            tracing::warn!("Rejected OAuth state: {}", e);
            return fail(e.reason());
        }
    };

    let cleared = cookies::build_cookie(cookies::STATE_COOKIE, "", 0);

    match link_mailbox(&state, oauth, &user, &code).await {
        Ok((email, ticket)) => {
            tracing::debug!("Redirect flow started scan {}", ticket.scan_id);

            let target = format!(
                "{}?gmail_connected=true&email={}",
                app_url,
                urlencoding::encode(&email)
            );
            ([(header::SET_COOKIE, cleared)], Redirect::temporary(&target)).into_response()
        }
        Err(e) => {
            tracing::error!("Gmail link failed for {}: {}", user, e);
            ([(header::SET_COOKIE, cleared)], fail(e.reason())).into_response()
        }
    }
}

// Scanning
pub async fn gmail_scan(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, Json<ScanStartedResponse>)> {
    let user = current_user(&headers);
    let linked = state
        .accounts
        .get(&user)
        .ok_or_else(|| ApiError::unauthorized("Gmail not connected"))?;

    let oauth = oauth(&state)?;
    let source = oauth.open_mailbox(&linked.refresh_token).await?;
    let ticket = state.scanner.trigger_scan(&user, Arc::new(source));

    tracing::info!("Manual scan {} requested for {}", ticket.scan_id, linked.email);

    Ok((
        StatusCode::ACCEPTED,
        Json(ScanStartedResponse {
            success: true,
            message: "Scan started".to_string(),
            scan_id: ticket.scan_id,
        }),
    ))
}

pub async fn gmail_disconnect(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ActionResponse>> {
    let user = current_user(&headers);
    let Some(linked) = state.accounts.get(&user) else {
        return Err(ApiError::not_found("Linked Gmail account"));
    };

    state.accounts.remove(&user);
    tracing::info!(
        "Disconnected {} from {} (linked since {})",
        linked.email,
        user,
        linked.linked_at
    );

    Ok(Json(ActionResponse::ok("Gmail disconnected")))
}

/// Exchange `code`, remember the mailbox and kick off its first scan.
async fn link_mailbox(
    state: &AppState,
    oauth: &GmailOAuth,
    user: &str,
    code: &str,
) -> Result<(String, ScanTicket), OAuthError> {
    let linked = oauth.complete(code).await?;
    state.accounts.save(user, &linked.email, &linked.refresh_token);
    tracing::info!("Gmail connected: {}", linked.email);

    let source: Arc<dyn MessageSource> = Arc::new(linked.source);
    let ticket = state.scanner.trigger_scan(user, source);
    Ok((linked.email, ticket))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_user_from_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(current_user(&headers), DEFAULT_USER);

        headers.insert(USER_HEADER, " alice ".parse().unwrap());
        assert_eq!(current_user(&headers), "alice");

        headers.insert(USER_HEADER, "".parse().unwrap());
        assert_eq!(current_user(&headers), DEFAULT_USER);
    }
}
