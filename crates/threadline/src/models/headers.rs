//! Threading headers resolved for a single inbound message

use serde::{Deserialize, Serialize};

/// Threading identifiers carried by one inbound message.
///
/// Every field is optional: `None` means no source produced that header.
/// Values are trimmed on construction and a blank value maps to `None`, so
/// an empty string can never masquerade as a real identifier downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadingHeaders {
    /// RFC 2822 Message-ID of this message, angle-bracket form as found
    pub message_id: Option<String>,
    /// Message-ID this message claims to reply to
    pub in_reply_to: Option<String>,
    /// Raw space-separated ancestor Message-ID chain, verbatim.
    /// Splitting into individual ids is the resolver's job.
    pub references: Option<String>,
    /// Exchange Thread-Index token, base64 text as transmitted
    pub thread_index: Option<String>,
    /// Normalized subject line, a weak fallback correlation key
    pub thread_topic: Option<String>,
}

impl ThreadingHeaders {
    /// Trim a raw header value, mapping blank input to absent.
    pub fn normalize(value: &str) -> Option<String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// True when no source produced any identifier at all
    pub fn is_empty(&self) -> bool {
        self.message_id.is_none()
            && self.in_reply_to.is_none()
            && self.references.is_none()
            && self.thread_index.is_none()
            && self.thread_topic.is_none()
    }
}
