//! Message source collaborator.
//!
//! The pipeline talks to the inbound message store (IMAP, Gmail, a test
//! double) through the `MessageSource` trait; credential handling and
//! transport live behind the implementation.

pub mod error;
pub mod parser;

pub use error::{Result, SourceError};
pub use parser::{parse_message, MessageMetadata, ParsedAttachment, ParsedMessage};

use serde::{Deserialize, Serialize};

/// Lightweight message preview returned by `search`. Metadata only; no
/// body or attachment bytes are fetched for previews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePreview {
    pub message_id: String,
    pub subject: String,
    pub from: String,
    pub date: String,
    pub snippet: String,
    pub has_attachment: bool,
    pub attachment_filenames: Vec<String>,
}

/// A decoded attachment payload from a fetched message.
#[derive(Debug, Clone)]
pub struct SourceAttachment {
    pub filename: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

/// A fully fetched message: the raw RFC 822 bytes plus decoded
/// attachment payloads.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub message_id: String,
    pub raw: Vec<u8>,
    pub attachments: Vec<SourceAttachment>,
}

impl FetchedMessage {
    /// Builds a fetched message from raw bytes, decoding attachments out
    /// of the MIME structure. Sources that already hold decoded parts can
    /// construct the struct directly instead.
    pub fn from_raw(message_id: &str, raw: Vec<u8>) -> Result<Self> {
        let parsed = parse_message(&raw)?;
        let attachments = parsed
            .attachments
            .into_iter()
            .map(|a| SourceAttachment {
                filename: a.filename,
                mime_type: a.mime_type,
                content: a.content,
            })
            .collect();
        Ok(Self {
            message_id: message_id.to_string(),
            raw,
            attachments,
        })
    }
}

/// Read access to the inbound message store.
///
/// `search` and `fetch` never mutate source state; `label` is the single
/// non-destructive write (adds a label, never deletes).
pub trait MessageSource: Send + Sync {
    /// Returns previews matching `query`, in source order, at most `max`.
    fn search(&self, query: &str, max: usize) -> Result<Vec<MessagePreview>>;

    /// Fetches the full message and its attachments.
    fn fetch(&self, message_id: &str) -> Result<FetchedMessage>;

    /// Applies a label to a message. Optional; the default implementation
    /// reports the capability as unsupported.
    fn label(&self, message_id: &str, label_name: &str) -> Result<()> {
        let _ = (message_id, label_name);
        Err(SourceError::Unsupported("label".to_string()))
    }
}
