//! Inbound email parsing: MIME decoding, quote stripping, sender extraction.

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChannelError;

/// A customer email, decoded and ready to become a step context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEmail {
    /// Local identifier, used in result records and logs.
    pub id: Uuid,
    /// Message-ID header (generated when missing).
    pub message_id: String,
    /// Sender address.
    pub from: String,
    pub subject: String,
    /// Readable body with quoted replies removed.
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl InboundEmail {
    pub fn new(
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            message_id: format!("<{id}@warranty-agent.local>"),
            from: from.into(),
            subject: subject.into(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }

    /// Parse a raw RFC 5322 message.
    pub fn parse(raw: &[u8]) -> Result<Self, ChannelError> {
        let parsed = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| ChannelError::InvalidMessage("not a parseable email".into()))?;

        let from = extract_sender(&parsed)
            .ok_or_else(|| ChannelError::InvalidMessage("email has no sender address".into()))?;
        let subject = parsed.subject().unwrap_or_default().trim().to_string();
        let body = strip_quoted_text(&extract_text(&parsed));

        let id = Uuid::new_v4();
        let message_id = parsed
            .message_id()
            .map(|s| format!("<{}>", s.trim_matches(|c| c == '<' || c == '>')))
            .unwrap_or_else(|| format!("<{id}@warranty-agent.local>"));
        let received_at = parsed
            .date()
            .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
            .unwrap_or_else(Utc::now);

        Ok(Self {
            id,
            message_id,
            from,
            subject,
            body,
            received_at,
        })
    }

    /// Subject for a reply to this email.
    pub fn reply_subject(&self) -> String {
        let subject = self.subject.trim();
        if subject.is_empty() {
            "Re: Your warranty request".to_string()
        } else if subject.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
            subject.to_string()
        } else {
            format!("Re: {subject}")
        }
    }
}

/// Strip quoted text from an email body.
///
/// Removes `>`-prefixed lines and everything after an "On ... wrote:" or
/// "Original Message" separator.
pub fn strip_quoted_text(body: &str) -> String {
    let mut result = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }

        if (trimmed.starts_with("On ") && trimmed.ends_with("wrote:"))
            || (trimmed.starts_with("---") && trimmed.contains("Original Message"))
        {
            break;
        }

        result.push(line);
    }

    while result.last().is_some_and(|l| l.trim().is_empty()) {
        result.pop();
    }

    result.join("\n")
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_sender(parsed: &mail_parser::Message) -> Option<String> {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Readable text: plain part, else de-tagged HTML, else the first text attachment.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.to_string();
        }
    }
    String::new()
}
