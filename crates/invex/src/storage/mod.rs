//! Object storage collaborator.
//!
//! Keys are deterministic functions of message/invoice id so a retried
//! job overwrites its earlier writes instead of appending duplicates.

pub mod filesystem;

pub use filesystem::FsObjectStore;

use crate::error::StorageError;

/// Minimal blob-store surface: overwriting put, whole-object get.
pub trait ObjectStore: Send + Sync {
    /// Stores `data` under `key`, overwriting any previous object.
    /// Returns the object's address (backend-specific).
    fn put(&self, key: &str, data: &[u8]) -> Result<String, StorageError>;

    /// Reads the object stored under `key`.
    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;
}

/// Key for the raw message payload.
pub fn raw_message_key(message_id: &str) -> String {
    format!("inbox/raw/{}.eml", sanitize_segment(message_id))
}

/// Key for one attachment of a message.
pub fn attachment_key(message_id: &str, filename: &str) -> String {
    format!(
        "inbox/attachments/{}/{}",
        sanitize_segment(message_id),
        sanitize_segment(filename)
    )
}

/// Key for the extraction summary of an invoice.
pub fn extraction_key(invoice_id: &str) -> String {
    format!("inbox/extraction/{}.json", sanitize_segment(invoice_id))
}

/// Keeps ids and filenames from escaping their key segment.
fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // "." and ".." segments would escape the store root.
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_deterministic() {
        assert_eq!(raw_message_key("msg-1"), raw_message_key("msg-1"));
        assert_eq!(raw_message_key("msg-1"), "inbox/raw/msg-1.eml");
        assert_eq!(
            attachment_key("msg-1", "invoice.pdf"),
            "inbox/attachments/msg-1/invoice.pdf"
        );
        assert_eq!(extraction_key("inv-9"), "inbox/extraction/inv-9.json");
    }

    #[test]
    fn test_keys_neutralize_path_separators() {
        assert_eq!(
            attachment_key("msg/../1", "../../etc/passwd"),
            "inbox/attachments/msg_.._1/.._.._etc_passwd"
        );
        assert_eq!(sanitize_segment("..."), "_");
    }
}
