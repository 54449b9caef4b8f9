//! Message ingestion pipeline
//!
//! The in-process caller role for webhook delivery and polling sync:
//! de-duplicate by provider message id, extract threading headers, resolve
//! the thread, then persist the message stamped with the resolved thread id
//! and any inherited assignee. Batch ingestion is idempotent and contains
//! per-message failures so one bad payload cannot stall a sync pass.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::ResolverConfig;
use crate::extract::{ProviderHeader, extract_threading_headers};
use crate::models::{MessageId, Scope, StoredMessage, ThreadId};
use crate::resolve::{MatchRule, Resolution, ResolutionRequest, resolve_thread};
use crate::storage::{ConversationStore, DuplicateDeliveryError};

/// Subject used when the provider supplies none
pub const DEFAULT_SUBJECT: &str = "No Subject";

/// One inbound message as delivered by a provider webhook or sync page
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEmail {
    pub provider_message_id: String,
    #[serde(default)]
    pub provider_conversation_id: Option<String>,
    #[serde(default)]
    pub headers: Vec<ProviderHeader>,
    #[serde(default)]
    pub html_body: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub from_address: String,
    #[serde(default)]
    pub to_addresses: String,
    pub received_at: DateTime<Utc>,
}

impl InboundEmail {
    /// Parse a webhook JSON payload
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).context("Failed to parse inbound email payload")
    }
}

/// Result of ingesting one message
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// Message persisted under the resolved thread
    Stored {
        message_id: MessageId,
        thread_id: ThreadId,
        rule: MatchRule,
        assigned_to: Option<String>,
    },
    /// Provider message id already ingested for this mailbox
    Duplicate,
}

/// Statistics from a batch ingestion pass
#[derive(Debug, Default, Clone)]
pub struct IngestStats {
    /// Number of messages in the batch
    pub received: usize,
    /// Number of new messages stored
    pub stored: usize,
    /// Number skipped as already ingested
    pub duplicates: usize,
    /// Number that failed resolution or persistence
    pub errors: usize,
    /// Duration of the pass
    pub duration_ms: u64,
}

/// Ingest one inbound message.
///
/// Fails only on store errors during resolution or persistence; the caller
/// retries the whole message later. Losing the delivery race to a
/// concurrent ingest of the same provider message id is a duplicate, not a
/// failure.
pub fn ingest_email(
    store: &dyn ConversationStore,
    config: &ResolverConfig,
    scope: &Scope,
    email: &InboundEmail,
) -> Result<IngestOutcome> {
    if store.has_provider_message(&scope.user_id, &email.provider_message_id)? {
        log::debug!(
            "[INGEST] skipping already-ingested message {}",
            email.provider_message_id
        );
        return Ok(IngestOutcome::Duplicate);
    }

    let headers = extract_threading_headers(&email.headers, &email.html_body);

    let subject = email
        .subject
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_SUBJECT)
        .to_string();

    let request = ResolutionRequest {
        headers: headers.clone(),
        subject: subject.clone(),
        from_address: email.from_address.clone(),
        to_addresses: email.to_addresses.clone(),
        received_at: email.received_at,
        scope: scope.clone(),
        provider_conversation_id: email.provider_conversation_id.clone(),
        provider_message_id: email.provider_message_id.clone(),
    };

    let Resolution {
        thread_id,
        inherited_assignee,
        rule,
    } = resolve_thread(store, config, &request)?;

    let message = StoredMessage::builder(
        MessageId::new(Uuid::new_v4().to_string()),
        thread_id.clone(),
        scope.clone(),
    )
    .provider_message_id(&email.provider_message_id)
    .message_id_header(headers.message_id)
    .in_reply_to_header(headers.in_reply_to)
    .references_header(headers.references)
    .thread_index_header(headers.thread_index)
    .provider_conversation_id(email.provider_conversation_id.clone())
    .subject(subject)
    .from_address(&email.from_address)
    .to_addresses(&email.to_addresses)
    .received_at(email.received_at)
    .assigned_to(inherited_assignee.clone())
    .build();

    let message_id = message.id.clone();

    if let Err(e) = store.insert_message(message) {
        if e.downcast_ref::<DuplicateDeliveryError>().is_some() {
            // Webhook and sync overlapped; the other delivery won
            log::debug!(
                "[INGEST] lost delivery race for message {}",
                email.provider_message_id
            );
            return Ok(IngestOutcome::Duplicate);
        }
        return Err(e);
    }

    Ok(IngestOutcome::Stored {
        message_id,
        thread_id,
        rule,
        assigned_to: inherited_assignee,
    })
}

/// Ingest a batch of inbound messages (one sync page, one webhook burst).
///
/// Per-message errors are counted and logged, not propagated; re-running
/// the same batch stores nothing new.
pub fn ingest_batch(
    store: &dyn ConversationStore,
    config: &ResolverConfig,
    scope: &Scope,
    emails: &[InboundEmail],
) -> IngestStats {
    let start = std::time::Instant::now();
    let mut stats = IngestStats {
        received: emails.len(),
        ..Default::default()
    };

    for email in emails {
        match ingest_email(store, config, scope, email) {
            Ok(IngestOutcome::Stored { thread_id, rule, .. }) => {
                stats.stored += 1;
                log::debug!(
                    "[INGEST] stored {} in thread {} via {rule:?}",
                    email.provider_message_id,
                    thread_id.as_str()
                );
            }
            Ok(IngestOutcome::Duplicate) => stats.duplicates += 1,
            Err(e) => {
                log::warn!(
                    "[INGEST] failed to ingest message {}: {e:#}",
                    email.provider_message_id
                );
                stats.errors += 1;
            }
        }
    }

    stats.duration_ms = start.elapsed().as_millis() as u64;
    stats
}
