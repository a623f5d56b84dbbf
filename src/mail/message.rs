//! Report-oriented view of a parsed email.

use std::sync::LazyLock;

use mail_parser::{Message, MessageParser, MimeHeaders, PartType};
use regex::Regex;

/// Thyrocare short report link, e.g. `https://thyro.care/n/o/0XTN0v`.
static REPORT_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https://thyro\.care/n/o/[^\s"'<>]+"#).expect("valid report link regex")
});

/// A PDF attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfAttachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// The parts of a message the fetcher cares about.
#[derive(Debug, Clone)]
pub struct ReportMail {
    /// `Message-ID` in `<...>` form, or the UID when the header is absent.
    pub message_id: String,
    pub from: String,
    pub subject: String,
    pub pdf_attachments: Vec<PdfAttachment>,
    /// All text/plain and text/html bodies, newline-joined.
    pub body_text: String,
}

impl ReportMail {
    /// Parse raw RFC 822 bytes. `None` if the bytes are not a message at all.
    pub fn parse(uid: u32, raw: &[u8]) -> Option<Self> {
        let parsed = MessageParser::default().parse(raw)?;

        let message_id = parsed
            .message_id()
            .filter(|id| !id.is_empty())
            .map(|id| format!("<{id}>"))
            .unwrap_or_else(|| uid.to_string());

        let from = parsed
            .from()
            .and_then(|addr| addr.first())
            .map(|a| match (a.name(), a.address()) {
                (Some(name), Some(addr)) => format!("{name} <{addr}>"),
                (None, Some(addr)) => addr.to_string(),
                (Some(name), None) => name.to_string(),
                (None, None) => String::new(),
            })
            .unwrap_or_default();

        let subject = parsed.subject().unwrap_or_default().to_string();

        let mut pdf_attachments = Vec::new();
        let mut bodies: Vec<&str> = Vec::new();
        collect_parts(&parsed, &mut pdf_attachments, &mut bodies);

        Some(Self {
            message_id,
            from,
            subject,
            pdf_attachments,
            body_text: bodies.join("\n"),
        })
    }

    /// First report link found in the message bodies.
    pub fn report_link(&self) -> Option<&str> {
        find_report_link(&self.body_text)
    }
}

/// Walk every part, descending into attached `message/rfc822` parts.
fn collect_parts<'a>(
    message: &'a Message<'_>,
    pdf_attachments: &mut Vec<PdfAttachment>,
    bodies: &mut Vec<&'a str>,
) {
    for part in &message.parts {
        match &part.body {
            PartType::Multipart(_) => continue,
            PartType::Message(nested) => {
                collect_parts(nested, pdf_attachments, bodies);
                continue;
            }
            PartType::Text(text) | PartType::Html(text) => bodies.push(text.as_ref()),
            PartType::Binary(_) | PartType::InlineBinary(_) => {}
        }

        let Some(filename) = MimeHeaders::attachment_name(part) else {
            continue;
        };
        if !filename.to_lowercase().ends_with(".pdf") || part.contents().is_empty() {
            continue;
        }
        pdf_attachments.push(PdfAttachment {
            filename: filename.to_string(),
            bytes: part.contents().to_vec(),
        });
    }
}

pub fn find_report_link(text: &str) -> Option<&str> {
    REPORT_LINK_RE.find(text).map(|m| m.as_str())
}
