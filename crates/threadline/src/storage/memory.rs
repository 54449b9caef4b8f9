//! In-memory storage implementation
//!
//! Used for tests and as a reference implementation of the store contract.
//! All maps are guarded by RwLocks; thread-root allocation holds a single
//! write lock across the find-and-create so concurrent first deliveries of
//! the same root converge on one thread id.

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use uuid::Uuid;

use super::traits::{ConversationStore, DuplicateDeliveryError};
use crate::models::{MessageId, Scope, StoredMessage, Thread, ThreadId};

pub struct InMemoryConversationStore {
    threads: RwLock<HashMap<String, Thread>>,
    messages: RwLock<HashMap<String, StoredMessage>>,
    thread_messages: RwLock<HashMap<String, HashSet<String>>>,
    /// (scope, root key) -> thread id; the atomic find-or-create surface
    thread_roots: RwLock<HashMap<(Scope, String), ThreadId>>,
    /// (user_id, provider_message_id) delivery backstop
    delivered: RwLock<HashSet<(String, String)>>,
}

impl InMemoryConversationStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
            thread_messages: RwLock::new(HashMap::new()),
            thread_roots: RwLock::new(HashMap::new()),
            delivered: RwLock::new(HashSet::new()),
        }
    }

    fn filter_messages<F>(&self, scope: &Scope, predicate: F) -> Vec<StoredMessage>
    where
        F: Fn(&StoredMessage) -> bool,
    {
        let messages = self.messages.read().unwrap();
        messages
            .values()
            .filter(|&m| &m.scope == scope && predicate(m))
            .cloned()
            .collect()
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn messages_with_message_id(
        &self,
        scope: &Scope,
        message_id_header: &str,
    ) -> Result<Vec<StoredMessage>> {
        Ok(self.filter_messages(scope, |m| {
            m.message_id_header.as_deref() == Some(message_id_header)
        }))
    }

    fn messages_with_any_message_id(
        &self,
        scope: &Scope,
        message_ids: &[&str],
    ) -> Result<Vec<StoredMessage>> {
        Ok(self.filter_messages(scope, |m| {
            m.message_id_header
                .as_deref()
                .is_some_and(|id| message_ids.contains(&id))
        }))
    }

    fn messages_with_conversation_id(
        &self,
        scope: &Scope,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>> {
        Ok(self.filter_messages(scope, |m| {
            m.provider_conversation_id.as_deref() == Some(conversation_id)
        }))
    }

    fn messages_with_thread_index(
        &self,
        scope: &Scope,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let mut candidates = self.filter_messages(scope, |m| m.thread_index_header.is_some());
        candidates.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        candidates.truncate(limit);
        Ok(candidates)
    }

    fn find_or_create_thread_root(
        &self,
        scope: &Scope,
        root_key: &str,
        subject: &str,
        created_at: DateTime<Utc>,
    ) -> Result<ThreadId> {
        let mut roots = self.thread_roots.write().unwrap();

        match roots.entry((scope.clone(), root_key.to_string())) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let thread_id = ThreadId::new(Uuid::new_v4().to_string());
                let thread =
                    Thread::new(thread_id.clone(), scope.clone(), subject, created_at);
                self.threads
                    .write()
                    .unwrap()
                    .insert(thread_id.0.clone(), thread);
                entry.insert(thread_id.clone());
                Ok(thread_id)
            }
        }
    }

    fn latest_assignee_in_thread(
        &self,
        scope: &Scope,
        thread_id: &ThreadId,
    ) -> Result<Option<String>> {
        let candidates = self.filter_messages(scope, |m| {
            m.thread_id == *thread_id && m.assigned_to.is_some()
        });

        Ok(candidates
            .into_iter()
            .max_by_key(|m| m.received_at)
            .and_then(|m| m.assigned_to))
    }

    fn insert_message(&self, message: StoredMessage) -> Result<()> {
        {
            let mut delivered = self.delivered.write().unwrap();
            let key = (
                message.scope.user_id.clone(),
                message.provider_message_id.clone(),
            );
            if !delivered.insert(key) {
                return Err(anyhow::Error::new(DuplicateDeliveryError));
            }
        }

        let msg_id = message.id.0.clone();
        let thread_id = message.thread_id.0.clone();

        self.messages
            .write()
            .unwrap()
            .insert(msg_id.clone(), message);
        self.thread_messages
            .write()
            .unwrap()
            .entry(thread_id)
            .or_default()
            .insert(msg_id);

        Ok(())
    }

    fn assign_message(&self, id: &MessageId, assignee: Option<&str>) -> Result<()> {
        let mut messages = self.messages.write().unwrap();
        let Some(message) = messages.get_mut(&id.0) else {
            bail!("No message with id {} to assign", id.as_str());
        };
        message.assigned_to = assignee.map(str::to_string);
        Ok(())
    }

    fn has_provider_message(&self, user_id: &str, provider_message_id: &str) -> Result<bool> {
        let delivered = self.delivered.read().unwrap();
        Ok(delivered.contains(&(user_id.to_string(), provider_message_id.to_string())))
    }

    fn get_thread(&self, id: &ThreadId) -> Result<Option<Thread>> {
        let threads = self.threads.read().unwrap();
        Ok(threads.get(&id.0).cloned())
    }

    fn list_messages_for_thread(&self, thread_id: &ThreadId) -> Result<Vec<StoredMessage>> {
        let thread_messages = self.thread_messages.read().unwrap();
        let messages = self.messages.read().unwrap();

        let mut result: Vec<StoredMessage> = thread_messages
            .get(&thread_id.0)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| messages.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();

        result.sort_by(|a, b| a.received_at.cmp(&b.received_at));

        Ok(result)
    }

    fn count_threads(&self) -> Result<usize> {
        let threads = self.threads.read().unwrap();
        Ok(threads.len())
    }

    fn clear(&self) -> Result<()> {
        self.threads.write().unwrap().clear();
        self.messages.write().unwrap().clear();
        self.thread_messages.write().unwrap().clear();
        self.thread_roots.write().unwrap().clear();
        self.delivered.write().unwrap().clear();
        Ok(())
    }
}
