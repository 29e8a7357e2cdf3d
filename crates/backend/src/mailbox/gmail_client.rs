//! Gmail API message source.

use anyhow::{Context, Result};
use async_trait::async_trait;
use google_gmail1::api::{Message, MessagePart};
use google_gmail1::hyper_rustls::HttpsConnector;
use google_gmail1::Gmail;
use hyper::StatusCode;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use super::{MessageBody, MessageId, MessageSource, RawMessage, SourceError};

/// Gmail caps `messages.list` pages at 500 ids
const MAX_PAGE_SIZE: u32 = 500;

/// Read-only Gmail mailbox authorized through a stored refresh token
pub struct GmailSource {
    hub: Gmail<HttpsConnector<HttpConnector>>,
}

impl GmailSource {
    /// Build a client for the mailbox that granted `refresh_token`.
    pub async fn connect(client_id: &str, client_secret: &str, refresh_token: &str) -> Result<Self> {
        // Use the yup_oauth2 re-exported by google_gmail1 to avoid version mismatch
        let secret = google_gmail1::yup_oauth2::authorized_user::AuthorizedUserSecret {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            refresh_token: refresh_token.to_string(),
            key_type: "authorized_user".to_string(),
        };

        let auth = google_gmail1::yup_oauth2::AuthorizedUserAuthenticator::builder(secret)
            .build()
            .await
            .context("Failed to build authenticator from refresh token")?;

        let connector = google_gmail1::hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .context("Failed to load native TLS roots")?
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            hub: Gmail::new(client, auth),
        })
    }

    /// Address of the linked mailbox
    pub async fn profile_email(&self) -> Result<String> {
        let (_, profile) = self
            .hub
            .users()
            .get_profile("me")
            .doit()
            .await
            .context("Failed to get profile")?;

        profile.email_address.context("No email address in profile")
    }

    fn to_raw_message(message: Message) -> RawMessage {
        let id = message.id.clone().unwrap_or_default();
        let mut subject = String::new();
        let mut from = String::new();

        if let Some(headers) = message.payload.as_ref().and_then(|p| p.headers.as_ref()) {
            for header in headers {
                match header.name.as_deref() {
                    Some("Subject") => subject = header.value.clone().unwrap_or_default(),
                    Some("From") => from = header.value.clone().unwrap_or_default(),
                    _ => {}
                }
            }
        }

        let body = message
            .payload
            .as_ref()
            .and_then(Self::body_bytes)
            .map(MessageBody::Bytes)
            .unwrap_or_default();

        RawMessage::new(id, subject, from, body)
    }

    /// Top-level body first, then the first text/plain part, then text/html.
    fn body_bytes(payload: &MessagePart) -> Option<Vec<u8>> {
        if let Some(data) = payload.body.as_ref().and_then(|b| b.data.as_ref()) {
            if !data.is_empty() {
                return Some(data.clone());
            }
        }

        let parts = payload.parts.as_deref()?;
        Self::find_part(parts, "text/plain").or_else(|| Self::find_part(parts, "text/html"))
    }

    fn find_part(parts: &[MessagePart], mime: &str) -> Option<Vec<u8>> {
        for part in parts {
            match part.mime_type.as_deref() {
                Some(m) if m == mime => {
                    if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_ref()) {
                        return Some(data.clone());
                    }
                }
                Some(m) if m.starts_with("multipart/") => {
                    if let Some(found) = part.parts.as_deref().and_then(|p| Self::find_part(p, mime)) {
                        return Some(found);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

fn classify_error(err: google_gmail1::Error, id: Option<&str>) -> SourceError {
    let not_found = match &err {
        google_gmail1::Error::Failure(response) => response.status() == StatusCode::NOT_FOUND,
        google_gmail1::Error::BadRequest(body) => {
            body.pointer("/error/code").and_then(|c| c.as_u64()) == Some(404)
        }
        _ => false,
    };

    match (not_found, id) {
        (true, Some(id)) => SourceError::NotFound(id.to_string()),
        _ => SourceError::Transient(err.to_string()),
    }
}

#[async_trait]
impl MessageSource for GmailSource {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<MessageId>, SourceError> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        while (ids.len() as u32) < max_results {
            let remaining = (max_results - ids.len() as u32).min(MAX_PAGE_SIZE);
            let mut call = self
                .hub
                .users()
                .messages_list("me")
                .q(query)
                .max_results(remaining);
            if let Some(token) = &page_token {
                call = call.page_token(token);
            }

            let (_, response) = call.doit().await.map_err(|e| classify_error(e, None))?;

            ids.extend(
                response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.id),
            );

            match response.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        ids.truncate(max_results as usize);
        Ok(ids)
    }

    async fn fetch(&self, id: &str) -> Result<RawMessage, SourceError> {
        let (_, message) = self
            .hub
            .users()
            .messages_get("me", id)
            .format("full")
            .doit()
            .await
            .map_err(|e| classify_error(e, Some(id)))?;

        Ok(Self::to_raw_message(message))
    }
}
