//! Email message records produced by fetch operations
//!
//! [`EmailMessage`] is the structured record the operation engine
//! builds from a FETCH response: the MIME content parsed out of the
//! raw RFC 5322 bytes, overlaid with the server-assigned metadata
//! (flags, sequence number, UID, octet size, source mailbox).
//!
//! The byte-level MIME parsing itself is delegated to `mailparse`;
//! [`EmailMessage::from_rfc822_bytes`] is the single entry point.

use crate::error::{Error, Result};
use crate::flag::Flag;
use chrono::DateTime;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// A decoded attachment part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub payload: Vec<u8>,
    pub content_id: Option<String>,
    pub transfer_encoding: Option<String>,
}

/// Fetch data items understood by the operation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessagePart {
    /// Entire message (`RFC822`).
    Rfc822,
    /// Entire message, body syntax (`BODY[]`).
    Body,
    /// Entire message without setting `\Seen` (`BODY.PEEK[]`).
    BodyPeek,
    /// Body text only (`BODY[TEXT]`).
    BodyText,
    /// Headers only (`BODY[HEADER]`).
    BodyHeader,
    /// Flags only (`FLAGS`).
    Flags,
    /// MIME structure without content (`BODYSTRUCTURE`).
    BodyStructure,
}

impl MessagePart {
    /// The FETCH data-item name on the wire.
    #[must_use]
    pub const fn as_imap_str(self) -> &'static str {
        match self {
            Self::Rfc822 => "RFC822",
            Self::Body => "BODY[]",
            Self::BodyPeek => "BODY.PEEK[]",
            Self::BodyText => "BODY[TEXT]",
            Self::BodyHeader => "BODY[HEADER]",
            Self::Flags => "FLAGS",
            Self::BodyStructure => "BODYSTRUCTURE",
        }
    }
}

/// A fetched email message.
///
/// Content fields come from parsing the raw bytes; `flags`,
/// `sequence_number`, `uid`, `size`, and `mailbox` are overlaid from
/// the server's FETCH response by the operation engine.
#[derive(Debug, Clone, Default)]
pub struct EmailMessage {
    /// RFC 5322 Message-ID, sanitized to `<local@domain>` form.
    pub message_id: Option<String>,
    pub subject: String,
    pub from_address: Option<String>,
    pub to_addresses: Vec<String>,
    pub cc_addresses: Vec<String>,
    pub bcc_addresses: Vec<String>,
    /// Date header normalized to ISO-8601 with seconds resolution.
    pub date: Option<String>,
    /// The raw RFC 5322 bytes as fetched.
    pub raw: Vec<u8>,
    pub plain_body: String,
    pub html_body: String,
    pub attachments: Vec<Attachment>,
    pub flags: Vec<Flag>,
    /// All headers, first value per name.
    pub headers: HashMap<String, String>,
    /// Octet count of the fetched segment.
    pub size: usize,
    pub sequence_number: Option<u32>,
    pub uid: Option<u32>,
    /// Mailbox the message was fetched from.
    pub mailbox: Option<String>,
}

impl EmailMessage {
    /// Parse a raw RFC 5322 message into a structured record.
    ///
    /// Pure with respect to the bytes: the server-overlay fields
    /// (`flags`, `sequence_number`, `uid`, `mailbox`) are left empty
    /// and `size` is set to the byte length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] when the bytes are not parseable as a
    /// MIME message.
    pub fn from_rfc822_bytes(bytes: &[u8]) -> Result<Self> {
        let parsed =
            mailparse::parse_mail(bytes).map_err(|e| Error::Parse(e.to_string()))?;

        let mut message = Self {
            message_id: sanitize_message_id(
                &parsed.headers.get_first_value("Message-ID").unwrap_or_default(),
            ),
            subject: parsed.headers.get_first_value("Subject").unwrap_or_default(),
            from_address: parsed.headers.get_first_value("From"),
            to_addresses: parsed.headers.get_all_values("To"),
            cc_addresses: parsed.headers.get_all_values("Cc"),
            bcc_addresses: parsed.headers.get_all_values("Bcc"),
            date: parsed
                .headers
                .get_first_value("Date")
                .and_then(|d| normalize_date(&d)),
            raw: bytes.to_vec(),
            size: bytes.len(),
            ..Self::default()
        };

        for header in &parsed.headers {
            message
                .headers
                .entry(header.get_key())
                .or_insert_with(|| header.get_value());
        }

        collect_parts(&parsed, &mut message)?;
        Ok(message)
    }

    /// True when this message carries what an APPEND upload needs.
    #[must_use]
    pub fn is_uploadable(&self) -> bool {
        self.date.is_some() && !self.raw.is_empty()
    }
}

/// Walk the MIME tree collecting text bodies and attachments.
fn collect_parts(part: &ParsedMail<'_>, message: &mut EmailMessage) -> Result<()> {
    if part.subparts.is_empty() {
        let disposition = part.get_content_disposition();
        let is_attachment = disposition.disposition == DispositionType::Attachment;

        if is_attachment {
            let payload = part
                .get_body_raw()
                .map_err(|e| Error::Parse(e.to_string()))?;
            message.attachments.push(Attachment {
                filename: disposition
                    .params
                    .get("filename")
                    .cloned()
                    .unwrap_or_else(|| "unnamed".to_string()),
                content_type: part.ctype.mimetype.clone(),
                payload,
                content_id: part
                    .headers
                    .get_first_value("Content-ID")
                    .as_deref()
                    .and_then(sanitize_message_id),
                transfer_encoding: part.headers.get_first_value("Content-Transfer-Encoding"),
            });
        } else {
            match part.ctype.mimetype.as_str() {
                "text/plain" => {
                    let body = part.get_body().map_err(|e| Error::Parse(e.to_string()))?;
                    message.plain_body.push_str(&body);
                }
                "text/html" => {
                    let body = part.get_body().map_err(|e| Error::Parse(e.to_string()))?;
                    message.html_body.push_str(&body);
                }
                _ => {}
            }
        }
        return Ok(());
    }

    for subpart in &part.subparts {
        collect_parts(subpart, message)?;
    }
    Ok(())
}

/// Extract the `<local@domain>` form from a Message-ID header value.
fn sanitize_message_id(value: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"<([^>]*)>").unwrap());
    pattern
        .captures(value)
        .map(|captures| format!("<{}>", &captures[1]))
}

/// Normalize an RFC 5322 date header to ISO-8601, seconds resolution.
fn normalize_date(value: &str) -> Option<String> {
    let epoch = mailparse::dateparse(value).ok()?;
    DateTime::from_timestamp(epoch, 0).map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string())
}
