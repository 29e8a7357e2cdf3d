//! Signed OAuth `state` tokens.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use super::types::{OAuthConfig, StateClaims};

/// Create a state token binding an OAuth round trip to `user`.
pub fn create_state_token(
    config: &OAuthConfig,
    user: &str,
    email: Option<String>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let exp = now + Duration::minutes(config.state_ttl_minutes);

    let claims = StateClaims {
        sub: user.to_string(),
        email,
        nonce: Uuid::new_v4().simple().to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.state_secret.as_bytes()),
    )
}

/// Validate a state token and return its claims.
pub fn validate_state_token(
    config: &OAuthConfig,
    token: &str,
) -> Result<StateClaims, jsonwebtoken::errors::Error> {
    let token_data = decode::<StateClaims>(
        token,
        &DecodingKey::from_secret(config.state_secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}
