//! Thread resolution
//!
//! Maps one inbound message to a single thread id, creating a thread only
//! when no existing conversation can be correlated. Matching rules run in
//! confidence order and the first hit wins; every rule is scoped to the
//! message's tenant/mailbox, so correlation can never cross a scope
//! boundary no matter how well the headers match.
//!
//! The only write performed here is the atomic find-or-create of a new
//! thread root; all other steps are read-only.

use anyhow::{Context, Result};
use base64::prelude::*;
use chrono::{DateTime, Utc};

use crate::config::ResolverConfig;
use crate::models::{Scope, StoredMessage, ThreadId, ThreadingHeaders};
use crate::storage::ConversationStore;

/// One inbound message's resolution input
#[derive(Debug, Clone)]
pub struct ResolutionRequest {
    pub headers: ThreadingHeaders,
    pub subject: String,
    pub from_address: String,
    pub to_addresses: String,
    pub received_at: DateTime<Utc>,
    pub scope: Scope,
    /// Provider-native grouping hint (e.g. Graph conversationId)
    pub provider_conversation_id: Option<String>,
    /// Provider-native message id; doubles as the root allocation key when
    /// the message carries no Message-ID through any source
    pub provider_message_id: String,
}

/// Which rule correlated the message to its thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    /// In-Reply-To matched a stored Message-ID
    InReplyTo,
    /// An entry of the References chain matched a stored Message-ID
    References,
    /// Provider conversation id matched
    ProviderConversation,
    /// Thread-Index shared a sufficient byte prefix with a stored index
    ThreadIndexPrefix,
    /// Nothing correlated; a new thread root was allocated
    NewThread,
}

/// The outcome of resolving one message
#[derive(Debug, Clone)]
pub struct Resolution {
    pub thread_id: ThreadId,
    /// Assignee of the most recently assigned message already in the
    /// thread, for the caller to stamp onto the new message row
    pub inherited_assignee: Option<String>,
    pub rule: MatchRule,
}

/// Resolve the thread for one inbound message.
///
/// Store failures during matching or allocation fail the resolution; the
/// caller retries the whole message later rather than proceed with a
/// guessed thread id. A failure of the assignment-inheritance side read is
/// non-fatal and only costs the hint.
pub fn resolve_thread(
    store: &dyn ConversationStore,
    config: &ResolverConfig,
    request: &ResolutionRequest,
) -> Result<Resolution> {
    let (thread_id, rule) = match match_existing(store, config, request)? {
        Some(matched) => matched,
        None => {
            let root_key = request
                .headers
                .message_id
                .as_deref()
                .unwrap_or(&request.provider_message_id);

            let thread_id = store
                .find_or_create_thread_root(
                    &request.scope,
                    root_key,
                    &request.subject,
                    request.received_at,
                )
                .context("Failed to allocate thread root")?;

            (thread_id, MatchRule::NewThread)
        }
    };

    log::debug!(
        "[RESOLVE] {} -> thread {} via {:?}",
        request.provider_message_id,
        thread_id.as_str(),
        rule
    );

    let inherited_assignee = if config.inherit_assignments {
        match store.latest_assignee_in_thread(&request.scope, &thread_id) {
            Ok(assignee) => assignee,
            Err(e) => {
                log::warn!(
                    "[RESOLVE] assignment inheritance lookup failed for thread {}: {e:#}",
                    thread_id.as_str()
                );
                None
            }
        }
    } else {
        None
    };

    Ok(Resolution {
        thread_id,
        inherited_assignee,
        rule,
    })
}

/// Run the correlation ladder against already-persisted messages
fn match_existing(
    store: &dyn ConversationStore,
    config: &ResolverConfig,
    request: &ResolutionRequest,
) -> Result<Option<(ThreadId, MatchRule)>> {
    // 1. Exact Message-ID match on In-Reply-To
    if let Some(in_reply_to) = &request.headers.in_reply_to {
        let candidates = store.messages_with_message_id(&request.scope, in_reply_to)?;
        if let Some(parent) = newest(candidates) {
            return Ok(Some((parent.thread_id, MatchRule::InReplyTo)));
        }
    }

    // 2. Any entry of the References chain; covers replies where
    //    In-Reply-To was dropped but References survived
    if let Some(references) = &request.headers.references {
        let ids = split_references(references);
        if !ids.is_empty() {
            let candidates = store.messages_with_any_message_id(&request.scope, &ids)?;
            if let Some(ancestor) = newest(candidates) {
                return Ok(Some((ancestor.thread_id, MatchRule::References)));
            }
        }
    }

    // 3. Provider's own conversation grouping, for messages whose header
    //    extraction failed entirely
    if let Some(conversation_id) = &request.provider_conversation_id {
        let candidates = store.messages_with_conversation_id(&request.scope, conversation_id)?;
        if let Some(sibling) = newest(candidates) {
            return Ok(Some((sibling.thread_id, MatchRule::ProviderConversation)));
        }
    }

    // 4. Thread-Index ancestry prefix, lowest confidence
    if let Some(index) = &request.headers.thread_index
        && let Some(bytes) = decode_thread_index(index)
    {
        let candidates = store
            .messages_with_thread_index(&request.scope, config.thread_index_candidate_cap)?;
        if let Some(ancestor) = closest_thread_index_ancestor(&bytes, candidates, config) {
            return Ok(Some((ancestor.thread_id, MatchRule::ThreadIndexPrefix)));
        }
    }

    Ok(None)
}

/// Split a raw References header into individual Message-IDs.
///
/// The chain is whitespace-separated, most-ancestral first by convention;
/// order does not matter for matching.
pub fn split_references(raw: &str) -> Vec<&str> {
    raw.split_whitespace().filter(|s| !s.is_empty()).collect()
}

/// Tie-break: prefer the most recently dated candidate. Conversations are
/// usually walked forward, so the newest matching ancestor is most likely
/// to carry the currently-correct thread id.
fn newest(candidates: Vec<StoredMessage>) -> Option<StoredMessage> {
    candidates.into_iter().max_by_key(|m| m.received_at)
}

/// Decode a Thread-Index token into its raw bytes.
///
/// Exchange transmits the index as base64; padding varies in the wild, so
/// both padded and unpadded decoders are tried.
fn decode_thread_index(index: &str) -> Option<Vec<u8>> {
    let decoders = [&BASE64_STANDARD, &BASE64_STANDARD_NO_PAD];

    for decoder in decoders {
        if let Ok(bytes) = decoder.decode(index.trim()) {
            return Some(bytes);
        }
    }

    log::debug!("[RESOLVE] unparsable Thread-Index value: {index:?}");
    None
}

/// Among stored messages carrying a Thread-Index, pick the closest ancestor:
/// the one sharing the longest byte prefix with the inbound index, provided
/// the shared prefix meets the configured minimum. Ties on prefix length
/// fall to the newest message.
fn closest_thread_index_ancestor(
    index_bytes: &[u8],
    candidates: Vec<StoredMessage>,
    config: &ResolverConfig,
) -> Option<StoredMessage> {
    candidates
        .into_iter()
        .filter_map(|m| {
            let stored = decode_thread_index(m.thread_index_header.as_deref()?)?;
            let shared = common_prefix_len(index_bytes, &stored);
            if shared >= config.min_thread_index_prefix_bytes {
                Some((shared, m))
            } else {
                None
            }
        })
        .max_by(|(a_len, a), (b_len, b)| a_len.cmp(b_len).then(a.received_at.cmp(&b.received_at)))
        .map(|(_, m)| m)
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageId, StoredMessage};
    use crate::storage::InMemoryConversationStore;
    use base64::prelude::*;

    fn scope() -> Scope {
        Scope::new("u1", "s1")
    }

    fn request(headers: ThreadingHeaders, provider_message_id: &str) -> ResolutionRequest {
        ResolutionRequest {
            headers,
            subject: "Order question".to_string(),
            from_address: "customer@example.com".to_string(),
            to_addresses: "support@shop.example".to_string(),
            received_at: Utc::now(),
            scope: scope(),
            provider_conversation_id: None,
            provider_message_id: provider_message_id.to_string(),
        }
    }

    fn seed_message(
        store: &InMemoryConversationStore,
        id: &str,
        thread_id: &ThreadId,
        message_id_header: Option<&str>,
    ) -> StoredMessage {
        let message = StoredMessage::builder(MessageId::new(id), thread_id.clone(), scope())
            .provider_message_id(format!("prov-{id}"))
            .message_id_header(message_id_header.map(str::to_string))
            .subject("Order question")
            .from_address("customer@example.com")
            .to_addresses("support@shop.example")
            .build();
        store.insert_message(message.clone()).unwrap();
        message
    }

    #[test]
    fn test_new_thread_when_nothing_correlates() {
        let store = InMemoryConversationStore::new();
        let config = ResolverConfig::default();

        let headers = ThreadingHeaders {
            message_id: Some("<a@x>".to_string()),
            ..Default::default()
        };

        let resolution = resolve_thread(&store, &config, &request(headers, "prov-1")).unwrap();
        assert_eq!(resolution.rule, MatchRule::NewThread);
        assert!(resolution.inherited_assignee.is_none());
        assert_eq!(store.count_threads().unwrap(), 1);
    }

    #[test]
    fn test_new_thread_allocation_is_idempotent() {
        let store = InMemoryConversationStore::new();
        let config = ResolverConfig::default();

        let headers = ThreadingHeaders {
            message_id: Some("<a@x>".to_string()),
            ..Default::default()
        };

        let first = resolve_thread(&store, &config, &request(headers.clone(), "prov-1")).unwrap();
        // Webhook redelivery: same headers, nothing persisted yet
        let second = resolve_thread(&store, &config, &request(headers, "prov-1")).unwrap();

        assert_eq!(first.thread_id, second.thread_id);
        assert_eq!(store.count_threads().unwrap(), 1);
    }

    #[test]
    fn test_in_reply_to_match() {
        let store = InMemoryConversationStore::new();
        let config = ResolverConfig::default();

        let root = resolve_thread(
            &store,
            &config,
            &request(
                ThreadingHeaders {
                    message_id: Some("<a@x>".to_string()),
                    ..Default::default()
                },
                "prov-1",
            ),
        )
        .unwrap();
        seed_message(&store, "m1", &root.thread_id, Some("<a@x>"));

        let reply = resolve_thread(
            &store,
            &config,
            &request(
                ThreadingHeaders {
                    message_id: Some("<b@y>".to_string()),
                    in_reply_to: Some("<a@x>".to_string()),
                    ..Default::default()
                },
                "prov-2",
            ),
        )
        .unwrap();

        assert_eq!(reply.thread_id, root.thread_id);
        assert_eq!(reply.rule, MatchRule::InReplyTo);
    }

    #[test]
    fn test_references_match_when_in_reply_to_dropped() {
        let store = InMemoryConversationStore::new();
        let config = ResolverConfig::default();

        let thread_id = store
            .find_or_create_thread_root(&scope(), "<a@x>", "Order question", Utc::now())
            .unwrap();
        seed_message(&store, "m1", &thread_id, Some("<a@x>"));

        let resolution = resolve_thread(
            &store,
            &config,
            &request(
                ThreadingHeaders {
                    message_id: Some("<c@z>".to_string()),
                    references: Some("<a@x> <b@y>".to_string()),
                    ..Default::default()
                },
                "prov-3",
            ),
        )
        .unwrap();

        assert_eq!(resolution.thread_id, thread_id);
        assert_eq!(resolution.rule, MatchRule::References);
    }

    #[test]
    fn test_provider_conversation_fallback() {
        let store = InMemoryConversationStore::new();
        let config = ResolverConfig::default();

        let thread_id = store
            .find_or_create_thread_root(&scope(), "prov-1", "Order question", Utc::now())
            .unwrap();
        let mut sibling = StoredMessage::builder(MessageId::new("m1"), thread_id.clone(), scope())
            .provider_message_id("prov-1")
            .subject("Order question")
            .from_address("customer@example.com")
            .to_addresses("support@shop.example")
            .build();
        sibling.provider_conversation_id = Some("conv-1".to_string());
        store.insert_message(sibling).unwrap();

        // No usable headers at all, only the provider's grouping
        let mut req = request(ThreadingHeaders::default(), "prov-2");
        req.provider_conversation_id = Some("conv-1".to_string());

        let resolution = resolve_thread(&store, &config, &req).unwrap();
        assert_eq!(resolution.thread_id, thread_id);
        assert_eq!(resolution.rule, MatchRule::ProviderConversation);
    }

    #[test]
    fn test_thread_index_prefix_match() {
        let store = InMemoryConversationStore::new();
        let config = ResolverConfig::default();

        // Root block (22 bytes) plus one child block on the stored message
        let root: Vec<u8> = (0u8..22).collect();
        let mut child = root.clone();
        child.extend_from_slice(&[1, 2, 3, 4, 5]);

        let thread_id = store
            .find_or_create_thread_root(&scope(), "prov-1", "Order question", Utc::now())
            .unwrap();
        let mut ancestor = StoredMessage::builder(MessageId::new("m1"), thread_id.clone(), scope())
            .provider_message_id("prov-1")
            .subject("Order question")
            .from_address("customer@example.com")
            .to_addresses("support@shop.example")
            .build();
        ancestor.thread_index_header = Some(BASE64_STANDARD.encode(&root));
        store.insert_message(ancestor).unwrap();

        let resolution = resolve_thread(
            &store,
            &config,
            &request(
                ThreadingHeaders {
                    thread_index: Some(BASE64_STANDARD.encode(&child)),
                    ..Default::default()
                },
                "prov-2",
            ),
        )
        .unwrap();

        assert_eq!(resolution.thread_id, thread_id);
        assert_eq!(resolution.rule, MatchRule::ThreadIndexPrefix);
    }

    #[test]
    fn test_thread_index_short_prefix_rejected() {
        let store = InMemoryConversationStore::new();
        let config = ResolverConfig::default();

        // Shares only 8 bytes with the stored index, below the threshold
        let stored: Vec<u8> = (0u8..22).collect();
        let mut unrelated: Vec<u8> = (0u8..8).collect();
        unrelated.extend_from_slice(&[200; 14]);

        let thread_id = store
            .find_or_create_thread_root(&scope(), "prov-1", "Order question", Utc::now())
            .unwrap();
        let mut message = StoredMessage::builder(MessageId::new("m1"), thread_id, scope())
            .provider_message_id("prov-1")
            .subject("Order question")
            .from_address("customer@example.com")
            .to_addresses("support@shop.example")
            .build();
        message.thread_index_header = Some(BASE64_STANDARD.encode(&stored));
        store.insert_message(message).unwrap();

        let resolution = resolve_thread(
            &store,
            &config,
            &request(
                ThreadingHeaders {
                    thread_index: Some(BASE64_STANDARD.encode(&unrelated)),
                    ..Default::default()
                },
                "prov-2",
            ),
        )
        .unwrap();

        assert_eq!(resolution.rule, MatchRule::NewThread);
    }

    #[test]
    fn test_tie_break_prefers_newest() {
        let store = InMemoryConversationStore::new();
        let config = ResolverConfig::default();

        // Two stored messages with the same Message-ID in different threads
        // (a previously split conversation); the newer one wins.
        let old_thread = store
            .find_or_create_thread_root(&scope(), "old", "Order question", Utc::now())
            .unwrap();
        let new_thread = store
            .find_or_create_thread_root(&scope(), "new", "Order question", Utc::now())
            .unwrap();

        let mut older = StoredMessage::builder(MessageId::new("m1"), old_thread, scope())
            .provider_message_id("prov-1")
            .message_id_header(Some("<a@x>".to_string()))
            .subject("Order question")
            .from_address("customer@example.com")
            .to_addresses("support@shop.example")
            .build();
        older.received_at = Utc::now() - chrono::Duration::hours(5);
        store.insert_message(older).unwrap();

        let mut newer = StoredMessage::builder(MessageId::new("m2"), new_thread.clone(), scope())
            .provider_message_id("prov-2")
            .message_id_header(Some("<a@x>".to_string()))
            .subject("Order question")
            .from_address("customer@example.com")
            .to_addresses("support@shop.example")
            .build();
        newer.received_at = Utc::now() - chrono::Duration::hours(1);
        store.insert_message(newer).unwrap();

        let resolution = resolve_thread(
            &store,
            &config,
            &request(
                ThreadingHeaders {
                    in_reply_to: Some("<a@x>".to_string()),
                    ..Default::default()
                },
                "prov-3",
            ),
        )
        .unwrap();

        assert_eq!(resolution.thread_id, new_thread);
    }

    #[test]
    fn test_cross_scope_never_matches() {
        let store = InMemoryConversationStore::new();
        let config = ResolverConfig::default();

        let thread_id = store
            .find_or_create_thread_root(&scope(), "<a@x>", "Order question", Utc::now())
            .unwrap();
        seed_message(&store, "m1", &thread_id, Some("<a@x>"));

        let mut req = request(
            ThreadingHeaders {
                in_reply_to: Some("<a@x>".to_string()),
                ..Default::default()
            },
            "prov-2",
        );
        req.scope = Scope::new("u2", "s2");

        let resolution = resolve_thread(&store, &config, &req).unwrap();
        assert_eq!(resolution.rule, MatchRule::NewThread);
        assert_ne!(resolution.thread_id, thread_id);
    }

    #[test]
    fn test_assignment_inheritance() {
        let store = InMemoryConversationStore::new();
        let config = ResolverConfig::default();

        let thread_id = store
            .find_or_create_thread_root(&scope(), "<a@x>", "Order question", Utc::now())
            .unwrap();
        let mut assigned = StoredMessage::builder(MessageId::new("m1"), thread_id, scope())
            .provider_message_id("prov-1")
            .message_id_header(Some("<a@x>".to_string()))
            .subject("Order question")
            .from_address("customer@example.com")
            .to_addresses("support@shop.example")
            .build();
        assigned.assigned_to = Some("alice".to_string());
        store.insert_message(assigned).unwrap();

        let resolution = resolve_thread(
            &store,
            &config,
            &request(
                ThreadingHeaders {
                    in_reply_to: Some("<a@x>".to_string()),
                    ..Default::default()
                },
                "prov-2",
            ),
        )
        .unwrap();

        assert_eq!(resolution.inherited_assignee, Some("alice".to_string()));
    }

    #[test]
    fn test_inheritance_disabled_by_config() {
        let store = InMemoryConversationStore::new();
        let config = ResolverConfig {
            inherit_assignments: false,
            ..Default::default()
        };

        let thread_id = store
            .find_or_create_thread_root(&scope(), "<a@x>", "Order question", Utc::now())
            .unwrap();
        let mut assigned = StoredMessage::builder(MessageId::new("m1"), thread_id, scope())
            .provider_message_id("prov-1")
            .message_id_header(Some("<a@x>".to_string()))
            .subject("Order question")
            .from_address("customer@example.com")
            .to_addresses("support@shop.example")
            .build();
        assigned.assigned_to = Some("alice".to_string());
        store.insert_message(assigned).unwrap();

        let resolution = resolve_thread(
            &store,
            &config,
            &request(
                ThreadingHeaders {
                    in_reply_to: Some("<a@x>".to_string()),
                    ..Default::default()
                },
                "prov-2",
            ),
        )
        .unwrap();

        assert!(resolution.inherited_assignee.is_none());
    }

    #[test]
    fn test_split_references() {
        assert_eq!(
            split_references("<a@x> <b@y>\t<c@z>"),
            vec!["<a@x>", "<b@y>", "<c@z>"]
        );
        assert!(split_references("   ").is_empty());
    }

    /// Wraps the in-memory store and fails selected operations, for
    /// exercising the resolver's error paths.
    struct FlakyStore {
        inner: InMemoryConversationStore,
        fail_lookups: bool,
        fail_allocation: bool,
        fail_assignee: bool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: InMemoryConversationStore::new(),
                fail_lookups: false,
                fail_allocation: false,
                fail_assignee: false,
            }
        }
    }

    impl ConversationStore for FlakyStore {
        fn messages_with_message_id(
            &self,
            scope: &Scope,
            message_id_header: &str,
        ) -> Result<Vec<StoredMessage>> {
            if self.fail_lookups {
                anyhow::bail!("database is locked");
            }
            self.inner.messages_with_message_id(scope, message_id_header)
        }

        fn messages_with_any_message_id(
            &self,
            scope: &Scope,
            message_ids: &[&str],
        ) -> Result<Vec<StoredMessage>> {
            if self.fail_lookups {
                anyhow::bail!("database is locked");
            }
            self.inner.messages_with_any_message_id(scope, message_ids)
        }

        fn messages_with_conversation_id(
            &self,
            scope: &Scope,
            conversation_id: &str,
        ) -> Result<Vec<StoredMessage>> {
            if self.fail_lookups {
                anyhow::bail!("database is locked");
            }
            self.inner.messages_with_conversation_id(scope, conversation_id)
        }

        fn messages_with_thread_index(
            &self,
            scope: &Scope,
            limit: usize,
        ) -> Result<Vec<StoredMessage>> {
            if self.fail_lookups {
                anyhow::bail!("database is locked");
            }
            self.inner.messages_with_thread_index(scope, limit)
        }

        fn find_or_create_thread_root(
            &self,
            scope: &Scope,
            root_key: &str,
            subject: &str,
            created_at: DateTime<Utc>,
        ) -> Result<ThreadId> {
            if self.fail_allocation {
                anyhow::bail!("database is locked");
            }
            self.inner
                .find_or_create_thread_root(scope, root_key, subject, created_at)
        }

        fn latest_assignee_in_thread(
            &self,
            scope: &Scope,
            thread_id: &ThreadId,
        ) -> Result<Option<String>> {
            if self.fail_assignee {
                anyhow::bail!("database is locked");
            }
            self.inner.latest_assignee_in_thread(scope, thread_id)
        }

        fn insert_message(&self, message: StoredMessage) -> Result<()> {
            self.inner.insert_message(message)
        }

        fn assign_message(&self, id: &MessageId, assignee: Option<&str>) -> Result<()> {
            self.inner.assign_message(id, assignee)
        }

        fn has_provider_message(&self, user_id: &str, provider_message_id: &str) -> Result<bool> {
            self.inner.has_provider_message(user_id, provider_message_id)
        }

        fn get_thread(&self, id: &ThreadId) -> Result<Option<crate::models::Thread>> {
            self.inner.get_thread(id)
        }

        fn list_messages_for_thread(&self, thread_id: &ThreadId) -> Result<Vec<StoredMessage>> {
            self.inner.list_messages_for_thread(thread_id)
        }

        fn count_threads(&self) -> Result<usize> {
            self.inner.count_threads()
        }

        fn clear(&self) -> Result<()> {
            self.inner.clear()
        }
    }

    #[test]
    fn test_inheritance_lookup_failure_is_non_fatal() {
        let mut store = FlakyStore::new();
        let config = ResolverConfig::default();

        let thread_id = store
            .find_or_create_thread_root(&scope(), "<a@x>", "Order question", Utc::now())
            .unwrap();
        let mut assigned = StoredMessage::builder(MessageId::new("m1"), thread_id.clone(), scope())
            .provider_message_id("prov-1")
            .message_id_header(Some("<a@x>".to_string()))
            .subject("Order question")
            .from_address("customer@example.com")
            .to_addresses("support@shop.example")
            .build();
        assigned.assigned_to = Some("alice".to_string());
        store.insert_message(assigned).unwrap();

        store.fail_assignee = true;

        let resolution = resolve_thread(
            &store,
            &config,
            &request(
                ThreadingHeaders {
                    in_reply_to: Some("<a@x>".to_string()),
                    ..Default::default()
                },
                "prov-2",
            ),
        )
        .unwrap();

        // Resolution survives; only the inheritance hint is lost
        assert_eq!(resolution.thread_id, thread_id);
        assert!(resolution.inherited_assignee.is_none());
    }

    #[test]
    fn test_lookup_failure_fails_resolution() {
        let mut store = FlakyStore::new();
        store.fail_lookups = true;
        let config = ResolverConfig::default();

        let result = resolve_thread(
            &store,
            &config,
            &request(
                ThreadingHeaders {
                    in_reply_to: Some("<a@x>".to_string()),
                    ..Default::default()
                },
                "prov-1",
            ),
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_allocation_failure_fails_resolution() {
        let mut store = FlakyStore::new();
        store.fail_allocation = true;
        let config = ResolverConfig::default();

        let result = resolve_thread(
            &store,
            &config,
            &request(ThreadingHeaders::default(), "prov-1"),
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_thread_index_candidate_cap_limits_scan() {
        let store = InMemoryConversationStore::new();
        let config = ResolverConfig {
            thread_index_candidate_cap: 1,
            ..Default::default()
        };

        let root: Vec<u8> = (0u8..22).collect();
        let mut child = root.clone();
        child.extend_from_slice(&[1, 2, 3, 4, 5]);
        let unrelated: Vec<u8> = (100u8..122).collect();

        // The matching ancestor is older than an unrelated indexed message,
        // so a cap of one leaves it outside the scan window.
        let thread_id = store
            .find_or_create_thread_root(&scope(), "prov-1", "Order question", Utc::now())
            .unwrap();
        let mut ancestor = StoredMessage::builder(MessageId::new("m1"), thread_id, scope())
            .provider_message_id("prov-1")
            .subject("Order question")
            .from_address("customer@example.com")
            .to_addresses("support@shop.example")
            .build();
        ancestor.received_at = Utc::now() - chrono::Duration::hours(5);
        ancestor.thread_index_header = Some(BASE64_STANDARD.encode(&root));
        store.insert_message(ancestor).unwrap();

        let other_thread = store
            .find_or_create_thread_root(&scope(), "prov-2", "Unrelated", Utc::now())
            .unwrap();
        let mut other = StoredMessage::builder(MessageId::new("m2"), other_thread, scope())
            .provider_message_id("prov-2")
            .subject("Unrelated")
            .from_address("someone@example.com")
            .to_addresses("support@shop.example")
            .build();
        other.received_at = Utc::now() - chrono::Duration::hours(1);
        other.thread_index_header = Some(BASE64_STANDARD.encode(&unrelated));
        store.insert_message(other).unwrap();

        let resolution = resolve_thread(
            &store,
            &config,
            &request(
                ThreadingHeaders {
                    thread_index: Some(BASE64_STANDARD.encode(&child)),
                    ..Default::default()
                },
                "prov-3",
            ),
        )
        .unwrap();
        assert_eq!(resolution.rule, MatchRule::NewThread);

        // An uncapped scan still finds the older ancestor
        let resolution = resolve_thread(
            &store,
            &ResolverConfig::default(),
            &request(
                ThreadingHeaders {
                    thread_index: Some(BASE64_STANDARD.encode(&child)),
                    ..Default::default()
                },
                "prov-4",
            ),
        )
        .unwrap();
        assert_eq!(resolution.rule, MatchRule::ThreadIndexPrefix);
    }

    #[test]
    fn test_decode_thread_index_tolerates_missing_padding() {
        let bytes: Vec<u8> = (0u8..22).collect();
        let padded = BASE64_STANDARD.encode(&bytes);
        let unpadded = BASE64_STANDARD_NO_PAD.encode(&bytes);

        assert_eq!(decode_thread_index(&padded), Some(bytes.clone()));
        assert_eq!(decode_thread_index(&unpadded), Some(bytes));
        assert_eq!(decode_thread_index("not base64!!"), None);
    }
}
