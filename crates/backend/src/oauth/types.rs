//! OAuth-related types and configuration.

use serde::{Deserialize, Serialize};

/// Claims carried by the OAuth `state` parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateClaims {
    /// Subject (user id that started the link)
    pub sub: String,
    /// Mailbox address the user said they would link, if any
    pub email: Option<String>,
    /// Random value so two links in the same second differ
    pub nonce: String,
    pub iat: i64,
    pub exp: i64,
}

/// Tokens returned by Google's token endpoint. The access token is not kept:
/// the Gmail client mints its own from the refresh token.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

/// Gmail linking configuration loaded from environment
#[derive(Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Key for signing state tokens
    pub state_secret: String,
    pub state_ttl_minutes: i64,
}

impl OAuthConfig {
    /// Load OAuth configuration from environment variables.
    ///
    /// Required env vars:
    /// - `GOOGLE_CLIENT_ID`: Google OAuth client ID
    /// - `GOOGLE_CLIENT_SECRET`: Google OAuth client secret
    ///
    /// Optional:
    /// - `GMAIL_REDIRECT_URL`: OAuth callback URI (defaults to the local redirect route)
    /// - `STATE_SECRET`: state signing key (defaults to the client secret)
    pub fn from_env() -> Result<Self, String> {
        let client_id = std::env::var("GOOGLE_CLIENT_ID")
            .map_err(|_| "GOOGLE_CLIENT_ID must be set".to_string())?;
        let client_secret = std::env::var("GOOGLE_CLIENT_SECRET")
            .map_err(|_| "GOOGLE_CLIENT_SECRET must be set".to_string())?;

        let redirect_uri = std::env::var("GMAIL_REDIRECT_URL").unwrap_or_else(|_| {
            "http://localhost:8080/api/gmail/callback/redirect".to_string()
        });

        let state_secret = std::env::var("STATE_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| client_secret.clone());

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri,
            state_secret,
            state_ttl_minutes: 10,
        })
    }
}
