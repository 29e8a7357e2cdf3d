//! Gmail account linking over Google OAuth.
//!
//! This module provides:
//! - consent URL construction for read-only Gmail access
//! - signed `state` tokens tying the callback to the user who started it
//! - authorization-code exchange for a refresh token
//! - per-user storage of linked mailboxes

mod accounts;
pub mod cookies;
mod state;
pub mod types;

use serde::Serialize;
use thiserror::Error;

use crate::mailbox::GmailSource;

pub use accounts::LinkedAccounts;
pub use state::{create_state_token, validate_state_token};
pub use types::{OAuthConfig, StateClaims, TokenGrant};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("token exchange failed: {0}")]
    Exchange(#[from] reqwest::Error),

    #[error("Google did not return a refresh token")]
    MissingRefreshToken,

    #[error("failed to open linked mailbox: {0}")]
    Mailbox(String),

    #[error("failed to read mailbox profile: {0}")]
    Profile(String),
}

impl OAuthError {
    /// Short reason code handed to the frontend after a failed redirect flow.
    pub fn reason(&self) -> &'static str {
        match self {
            OAuthError::InvalidState(_) => "invalid_state",
            OAuthError::Exchange(_) | OAuthError::MissingRefreshToken => "token_exchange_failed",
            OAuthError::Mailbox(_) => "gmail_service_failed",
            OAuthError::Profile(_) => "profile_failed",
        }
    }
}

/// A mailbox that has just completed the OAuth handshake
pub struct LinkedSource {
    pub email: String,
    pub refresh_token: String,
    pub source: GmailSource,
}

pub struct GmailOAuth {
    config: OAuthConfig,
    http: reqwest::Client,
}

impl GmailOAuth {
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Google consent screen URL for read-only Gmail access.
    pub fn consent_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
            GOOGLE_AUTH_URL,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(GMAIL_READONLY_SCOPE),
            urlencoding::encode(state)
        )
    }

    pub fn issue_state(&self, user: &str, email: Option<String>) -> Result<String, OAuthError> {
        create_state_token(&self.config, user, email)
            .map_err(|e| OAuthError::InvalidState(e.to_string()))
    }

    pub fn verify_state(&self, state: &str) -> Result<StateClaims, OAuthError> {
        validate_state_token(&self.config, state).map_err(|e| OAuthError::InvalidState(e.to_string()))
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant, OAuthError> {
        #[derive(Serialize)]
        struct TokenRequest<'a> {
            code: &'a str,
            client_id: &'a str,
            client_secret: &'a str,
            redirect_uri: &'a str,
            grant_type: &'a str,
        }

        let grant = self
            .http
            .post(GOOGLE_TOKEN_URL)
            .form(&TokenRequest {
                code,
                client_id: &self.config.client_id,
                client_secret: &self.config.client_secret,
                redirect_uri: &self.config.redirect_uri,
                grant_type: "authorization_code",
            })
            .send()
            .await?
            .error_for_status()?
            .json::<TokenGrant>()
            .await?;

        tracing::debug!("Token exchange succeeded (access token valid {}s)", grant.expires_in);
        Ok(grant)
    }

    /// Open the mailbox behind a stored refresh token.
    pub async fn open_mailbox(&self, refresh_token: &str) -> Result<GmailSource, OAuthError> {
        GmailSource::connect(
            &self.config.client_id,
            &self.config.client_secret,
            refresh_token,
        )
        .await
        .map_err(|e| OAuthError::Mailbox(format!("{e:#}")))
    }

    /// Finish the handshake: exchange `code` and open the granted mailbox.
    pub async fn complete(&self, code: &str) -> Result<LinkedSource, OAuthError> {
        let grant = self.exchange_code(code).await?;
        let refresh_token = grant.refresh_token.ok_or(OAuthError::MissingRefreshToken)?;

        let source = self.open_mailbox(&refresh_token).await?;
        let email = source
            .profile_email()
            .await
            .map_err(|e| OAuthError::Profile(format!("{e:#}")))?;

        Ok(LinkedSource {
            email,
            refresh_token,
            source,
        })
    }
}
