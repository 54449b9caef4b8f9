//! Storage trait definitions

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{MessageId, Scope, StoredMessage, Thread, ThreadId};

/// Returned when a message insert collides with an already-delivered
/// provider message id for the same mailbox.
///
/// The external dedup check runs before resolution, but webhook delivery
/// and polling sync can overlap; the unique `(user_id, provider_message_id)`
/// constraint is the backstop, and callers downcast to this to treat the
/// loss of that race as a duplicate rather than a failure.
#[derive(Debug, thiserror::Error)]
#[error("message was already delivered for this mailbox")]
pub struct DuplicateDeliveryError;

/// Trait for conversation storage operations.
///
/// Every lookup is scope-qualified; a match belonging to another tenant or
/// mailbox is excluded by construction, not filtered after the fact.
/// Candidate lookups leave the newest-first tie-break to the resolver; only
/// the Thread-Index scan is capped here, since it has no exact key to
/// narrow on.
pub trait ConversationStore: Send + Sync {
    /// Messages whose stored Message-ID header equals the given id
    fn messages_with_message_id(
        &self,
        scope: &Scope,
        message_id_header: &str,
    ) -> Result<Vec<StoredMessage>>;

    /// Messages whose stored Message-ID header matches any of the given ids
    fn messages_with_any_message_id(
        &self,
        scope: &Scope,
        message_ids: &[&str],
    ) -> Result<Vec<StoredMessage>>;

    /// Messages sharing a provider conversation id
    fn messages_with_conversation_id(
        &self,
        scope: &Scope,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>>;

    /// Up to `limit` messages carrying a Thread-Index header, newest first;
    /// the prefix policy lives in the resolver
    fn messages_with_thread_index(
        &self,
        scope: &Scope,
        limit: usize,
    ) -> Result<Vec<StoredMessage>>;

    /// Atomically find or create the thread rooted at `root_key`.
    ///
    /// Concurrent calls with the same `(scope, root_key)` must converge on
    /// one thread id. A plain check-then-insert is a race and is not an
    /// acceptable implementation.
    fn find_or_create_thread_root(
        &self,
        scope: &Scope,
        root_key: &str,
        subject: &str,
        created_at: DateTime<Utc>,
    ) -> Result<ThreadId>;

    /// Assignee of the most recently dated assigned message in a thread
    fn latest_assignee_in_thread(
        &self,
        scope: &Scope,
        thread_id: &ThreadId,
    ) -> Result<Option<String>>;

    /// Insert a message row. Fails with [`DuplicateDeliveryError`] when the
    /// mailbox already holds the provider message id.
    fn insert_message(&self, message: StoredMessage) -> Result<()>;

    /// Set or clear the assignee on a message (triage action). Fails when
    /// no message with that id exists, so a lost triage write is visible.
    fn assign_message(&self, id: &MessageId, assignee: Option<&str>) -> Result<()>;

    /// Whether the mailbox has already ingested this provider message id
    fn has_provider_message(&self, user_id: &str, provider_message_id: &str) -> Result<bool>;

    /// Get a thread by id
    fn get_thread(&self, id: &ThreadId) -> Result<Option<Thread>>;

    /// Messages in a thread, ordered by received_at ascending
    fn list_messages_for_thread(&self, thread_id: &ThreadId) -> Result<Vec<StoredMessage>>;

    /// Count total threads
    fn count_threads(&self) -> Result<usize>;

    /// Clear all data (for testing)
    fn clear(&self) -> Result<()>;
}
