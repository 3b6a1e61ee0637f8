//! RFC 822 message parsing: body text, header metadata and attachments.

use log::debug;
use mail_parser::{Message, MessageParser, MimeHeaders, PartType};

use super::error::{Result, SourceError};

/// Header metadata of a parsed message.
#[derive(Debug, Clone, Default)]
pub struct MessageMetadata {
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    /// Date header in RFC 3339 format.
    pub date: Option<String>,
}

impl MessageMetadata {
    /// Creates a formatted header block for prepending to extracted text,
    /// so downstream matching can see sender and subject.
    pub fn to_header_block(&self) -> String {
        use std::fmt::Write;

        let mut output = String::new();
        output.push_str("=== MESSAGE METADATA ===\n");

        // Writing to a String cannot fail; the Results are discarded.
        if let Some(from) = &self.from {
            let _ = writeln!(output, "From: {}", from);
        }
        if let Some(to) = &self.to {
            let _ = writeln!(output, "To: {}", to);
        }
        if let Some(subject) = &self.subject {
            let _ = writeln!(output, "Subject: {}", subject);
        }
        if let Some(date) = &self.date {
            let _ = writeln!(output, "Date: {}", date);
        }
        if let Some(message_id) = &self.message_id {
            let _ = writeln!(output, "Message-ID: {}", message_id);
        }

        output.push_str("========================\n\n");
        output
    }

    /// Returns true if this metadata has any meaningful content.
    pub fn has_content(&self) -> bool {
        self.from.is_some()
            || self.to.is_some()
            || self.subject.is_some()
            || self.date.is_some()
            || self.message_id.is_some()
    }
}

/// An attachment extracted from a message.
#[derive(Debug, Clone)]
pub struct ParsedAttachment {
    /// The attachment's filename (sanitized, no path components).
    pub filename: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

/// A parsed message: metadata, plain-text body and attachments.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub metadata: MessageMetadata,
    pub body_text: String,
    pub attachments: Vec<ParsedAttachment>,
}

/// Parses raw RFC 822 bytes into body text, metadata and attachments.
pub fn parse_message(raw: &[u8]) -> Result<ParsedMessage> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| SourceError::Parse("Failed to parse message".to_string()))?;

    let metadata = extract_metadata(&message);
    let body_text = message
        .body_text(0)
        .map(|t| t.to_string())
        .unwrap_or_default();

    let mut attachments = Vec::new();
    for part in message.parts.iter() {
        if !is_attachment(part) {
            continue;
        }

        let content = match &part.body {
            PartType::Binary(data) | PartType::InlineBinary(data) => data.to_vec(),
            PartType::Text(text) => text.as_bytes().to_vec(),
            PartType::Html(html) => html.as_bytes().to_vec(),
            _ => continue,
        };

        let filename = part
            .attachment_name()
            .map(sanitize_filename)
            .unwrap_or_else(|| "attachment.bin".to_string());

        let mime_type = part
            .content_type()
            .map(|ct| {
                if let Some(subtype) = ct.subtype() {
                    format!("{}/{}", ct.ctype(), subtype)
                } else {
                    ct.ctype().to_string()
                }
            })
            .or_else(|| {
                mime_guess::from_path(&filename)
                    .first()
                    .map(|m| m.to_string())
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());

        debug!(
            "Found attachment: {} ({}, {} bytes)",
            filename,
            mime_type,
            content.len()
        );

        attachments.push(ParsedAttachment {
            filename,
            mime_type,
            content,
        });
    }

    Ok(ParsedMessage {
        metadata,
        body_text,
        attachments,
    })
}

fn extract_metadata(message: &Message) -> MessageMetadata {
    MessageMetadata {
        message_id: message.message_id().map(|s| s.to_string()),
        subject: message.subject().map(|s| s.to_string()),
        from: message
            .from()
            .and_then(|addr| addr.first().map(format_address)),
        to: message.to().and_then(|addr| addr.first().map(format_address)),
        date: message.date().map(|d| d.to_rfc3339()),
    }
}

fn format_address(addr: &mail_parser::Addr) -> String {
    if let Some(name) = addr.name() {
        format!("{} <{}>", name, addr.address().unwrap_or_default())
    } else {
        addr.address().unwrap_or_default().to_string()
    }
}

/// Checks if a message part is an attachment: an explicit attachment
/// disposition, or any part carrying a filename (inline attachments).
fn is_attachment(part: &mail_parser::MessagePart) -> bool {
    if let Some(disposition) = part.content_disposition() {
        if disposition.ctype() == "attachment" {
            return true;
        }
    }
    part.attachment_name().is_some()
}

/// Strips path components from an attachment filename.
fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim()
        .to_string();
    if base.is_empty() {
        "attachment.bin".to_string()
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "From: Billing <billing@acme.example>\r\n\
To: ap@example.com\r\n\
Subject: Invoice INV-2025-123\r\n\
Date: Mon, 17 Mar 2025 10:00:00 +0000\r\n\
Message-ID: <abc@acme.example>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain; charset=\"utf-8\"\r\n\
\r\n\
Please find the invoice attached.\r\n\
--XYZ\r\n\
Content-Type: text/plain; name=\"invoice.txt\"\r\n\
Content-Disposition: attachment; filename=\"invoice.txt\"\r\n\
\r\n\
ACME SUPPLIES\r\n\
Invoice INV-2025-123\r\n\
Total: $11,210.00\r\n\
--XYZ--\r\n";

    #[test]
    fn test_parse_multipart_message() {
        let parsed = parse_message(SAMPLE.as_bytes()).unwrap();

        assert!(parsed.body_text.contains("Please find the invoice attached."));
        assert_eq!(
            parsed.metadata.subject.as_deref(),
            Some("Invoice INV-2025-123")
        );
        assert_eq!(
            parsed.metadata.from.as_deref(),
            Some("Billing <billing@acme.example>")
        );

        assert_eq!(parsed.attachments.len(), 1);
        let attachment = &parsed.attachments[0];
        assert_eq!(attachment.filename, "invoice.txt");
        assert_eq!(attachment.mime_type, "text/plain");
        let content = String::from_utf8_lossy(&attachment.content);
        assert!(content.contains("ACME SUPPLIES"));
        assert!(content.contains("Total: $11,210.00"));
    }

    #[test]
    fn test_parse_plain_message_without_attachments() {
        let raw = "From: a@b.example\r\nSubject: Hello\r\n\r\nJust a body.\r\n";
        let parsed = parse_message(raw.as_bytes()).unwrap();

        assert!(parsed.body_text.contains("Just a body."));
        assert!(parsed.attachments.is_empty());
        assert_eq!(parsed.metadata.subject.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_parse_garbage_fails() {
        // mail-parser is lenient, but empty input has nothing to parse.
        assert!(parse_message(b"").is_err());
    }

    #[test]
    fn test_header_block_contains_all_fields() {
        let metadata = MessageMetadata {
            message_id: Some("<msg123@example.com>".to_string()),
            subject: Some("Test Subject".to_string()),
            from: Some("sender@example.com".to_string()),
            to: Some("recipient@example.com".to_string()),
            date: Some("2025-03-17T10:00:00Z".to_string()),
        };

        let header = metadata.to_header_block();
        assert!(header.contains("=== MESSAGE METADATA ==="));
        assert!(header.contains("From: sender@example.com"));
        assert!(header.contains("Subject: Test Subject"));
        assert!(header.contains("Message-ID: <msg123@example.com>"));
    }

    #[test]
    fn test_header_block_partial() {
        let metadata = MessageMetadata {
            subject: Some("Test".to_string()),
            ..Default::default()
        };

        let header = metadata.to_header_block();
        assert!(header.contains("Subject: Test"));
        assert!(!header.contains("From:"));
        assert!(metadata.has_content());
        assert!(!MessageMetadata::default().has_content());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("invoice.pdf"), "invoice.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("dir\\evil.exe"), "evil.exe");
        assert_eq!(sanitize_filename("  "), "attachment.bin");
    }
}
