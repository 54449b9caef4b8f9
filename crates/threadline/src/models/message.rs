//! Stored message model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Scope, ThreadId};

/// Unique identifier for a stored message (internal, not the RFC 2822 id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A persisted message row, the resolver's read target.
///
/// `thread_id` is set once at ingestion and never rewritten. The threading
/// header columns are kept exactly as extracted so later messages can
/// correlate against them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub scope: Scope,
    /// Provider-native message id, the external dedup key within a mailbox
    pub provider_message_id: String,
    /// RFC 2822 Message-ID as extracted, absent if no source carried one
    pub message_id_header: Option<String>,
    pub in_reply_to_header: Option<String>,
    /// Raw References chain, verbatim
    pub references_header: Option<String>,
    pub thread_index_header: Option<String>,
    /// Provider conversation grouping hint (e.g. Graph conversationId)
    pub provider_conversation_id: Option<String>,
    pub subject: String,
    pub from_address: String,
    pub to_addresses: String,
    pub received_at: DateTime<Utc>,
    /// Support agent this message is assigned to
    pub assigned_to: Option<String>,
}

impl StoredMessage {
    pub fn builder(id: MessageId, thread_id: ThreadId, scope: Scope) -> StoredMessageBuilder {
        StoredMessageBuilder::new(id, thread_id, scope)
    }
}

/// Builder for creating StoredMessage instances
pub struct StoredMessageBuilder {
    id: MessageId,
    thread_id: ThreadId,
    scope: Scope,
    provider_message_id: String,
    message_id_header: Option<String>,
    in_reply_to_header: Option<String>,
    references_header: Option<String>,
    thread_index_header: Option<String>,
    provider_conversation_id: Option<String>,
    subject: String,
    from_address: String,
    to_addresses: String,
    received_at: Option<DateTime<Utc>>,
    assigned_to: Option<String>,
}

impl StoredMessageBuilder {
    fn new(id: MessageId, thread_id: ThreadId, scope: Scope) -> Self {
        Self {
            id,
            thread_id,
            scope,
            provider_message_id: String::new(),
            message_id_header: None,
            in_reply_to_header: None,
            references_header: None,
            thread_index_header: None,
            provider_conversation_id: None,
            subject: String::new(),
            from_address: String::new(),
            to_addresses: String::new(),
            received_at: None,
            assigned_to: None,
        }
    }

    pub fn provider_message_id(mut self, id: impl Into<String>) -> Self {
        self.provider_message_id = id.into();
        self
    }

    pub fn message_id_header(mut self, header: Option<String>) -> Self {
        self.message_id_header = header;
        self
    }

    pub fn in_reply_to_header(mut self, header: Option<String>) -> Self {
        self.in_reply_to_header = header;
        self
    }

    pub fn references_header(mut self, header: Option<String>) -> Self {
        self.references_header = header;
        self
    }

    pub fn thread_index_header(mut self, header: Option<String>) -> Self {
        self.thread_index_header = header;
        self
    }

    pub fn provider_conversation_id(mut self, id: Option<String>) -> Self {
        self.provider_conversation_id = id;
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn from_address(mut self, from: impl Into<String>) -> Self {
        self.from_address = from.into();
        self
    }

    pub fn to_addresses(mut self, to: impl Into<String>) -> Self {
        self.to_addresses = to.into();
        self
    }

    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }

    pub fn assigned_to(mut self, assignee: Option<String>) -> Self {
        self.assigned_to = assignee;
        self
    }

    pub fn build(self) -> StoredMessage {
        StoredMessage {
            id: self.id,
            thread_id: self.thread_id,
            scope: self.scope,
            provider_message_id: self.provider_message_id,
            message_id_header: self.message_id_header,
            in_reply_to_header: self.in_reply_to_header,
            references_header: self.references_header,
            thread_index_header: self.thread_index_header,
            provider_conversation_id: self.provider_conversation_id,
            subject: self.subject,
            from_address: self.from_address,
            to_addresses: self.to_addresses,
            received_at: self.received_at.unwrap_or_else(Utc::now),
            assigned_to: self.assigned_to,
        }
    }
}
