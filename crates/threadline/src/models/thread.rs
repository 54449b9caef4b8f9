//! Thread model representing one logical conversation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Scope;

/// Unique identifier for a thread
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A persistent grouping of messages forming one conversation.
///
/// Threads are created implicitly by the first message that cannot be
/// correlated to an existing conversation, and are never deleted here.
/// The thread's current assignee is not stored on the thread; it is derived
/// from the most recently assigned member message at query time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub scope: Scope,
    /// Subject of the root message
    pub subject: String,
    pub created_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(
        id: ThreadId,
        scope: Scope,
        subject: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            scope,
            subject: subject.into(),
            created_at,
        }
    }
}
