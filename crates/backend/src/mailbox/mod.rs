//! Mailbox access for subscription scans.
//!
//! The scanner only talks to a [`MessageSource`]; the Gmail implementation lives
//! in [`gmail_client`], and tests use the in-memory fake.

use async_trait::async_trait;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use thiserror::Error;

#[cfg(test)]
pub mod fake;
mod gmail_client;

pub use gmail_client::GmailSource;

/// Opaque message identifier assigned by the mailbox provider
pub type MessageId = String;

/// base64url, padded or not
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Errors from a mailbox search or fetch
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("message {0} not found")]
    NotFound(MessageId),

    #[error("mailbox request failed: {0}")]
    Transient(String),
}

/// A message body could not be turned into text
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64url body: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("body is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Message body as it arrived from the provider, not yet decoded.
#[derive(Debug, Clone, Default)]
pub enum MessageBody {
    #[default]
    Empty,
    /// base64url text, as carried in the Gmail JSON payload
    Encoded(String),
    /// Bytes already stripped of their transport encoding
    Bytes(Vec<u8>),
}

/// A fetched message, held only while it is being examined.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: MessageId,
    pub subject: String,
    pub from: String,
    body: MessageBody,
}

impl RawMessage {
    pub fn new(
        id: impl Into<MessageId>,
        subject: impl Into<String>,
        from: impl Into<String>,
        body: MessageBody,
    ) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            from: from.into(),
            body,
        }
    }

    /// Decode the body to UTF-8 text.
    pub fn decode_body(&self) -> Result<String, DecodeError> {
        match &self.body {
            MessageBody::Empty => Ok(String::new()),
            MessageBody::Encoded(data) => {
                let bytes = URL_SAFE_LENIENT.decode(data.trim())?;
                Ok(String::from_utf8(bytes)?)
            }
            MessageBody::Bytes(bytes) => Ok(String::from_utf8(bytes.clone())?),
        }
    }

    /// Decoded body text; an undecodable body reads as empty.
    pub fn body(&self) -> String {
        match self.decode_body() {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!("Treating body of message {} as empty: {}", self.id, e);
                String::new()
            }
        }
    }
}

/// An authorized mailbox the scanner can search and read.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Identifiers of messages matching `query`, at most `max_results` of them.
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<MessageId>, SourceError>;

    /// Full content of one message.
    async fn fetch(&self, id: &str) -> Result<RawMessage, SourceError>;
}
