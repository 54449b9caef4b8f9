//! SQLite-based conversation storage

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use rusqlite_migration::{M, Migrations};
use uuid::Uuid;

use super::traits::{ConversationStore, DuplicateDeliveryError};
use crate::models::{MessageId, Scope, StoredMessage, Thread, ThreadId};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- One row per conversation
            CREATE TABLE threads (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                store_id TEXT NOT NULL,
                subject TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Atomic find-or-create surface: a conversation root per
            -- (scope, root message id). The primary key is the conflict
            -- target that makes concurrent allocation converge.
            CREATE TABLE thread_roots (
                user_id TEXT NOT NULL,
                store_id TEXT NOT NULL,
                root_key TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                PRIMARY KEY (user_id, store_id, root_key),
                FOREIGN KEY (thread_id) REFERENCES threads(id)
            );

            CREATE TABLE messages (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                store_id TEXT NOT NULL,
                provider_message_id TEXT NOT NULL,
                message_id_header TEXT,
                in_reply_to_header TEXT,
                references_header TEXT,
                thread_index_header TEXT,
                provider_conversation_id TEXT,
                subject TEXT NOT NULL,
                from_address TEXT NOT NULL,
                to_addresses TEXT NOT NULL,
                received_at TEXT NOT NULL,
                assigned_to TEXT,
                FOREIGN KEY (thread_id) REFERENCES threads(id)
            );

            -- Delivery backstop: one row per provider message per mailbox
            CREATE UNIQUE INDEX idx_messages_provider_dedup
                ON messages(user_id, provider_message_id);

            -- Scope-qualified correlation lookups
            CREATE INDEX idx_messages_message_id_header
                ON messages(user_id, store_id, message_id_header);
            CREATE INDEX idx_messages_conversation_id
                ON messages(user_id, store_id, provider_conversation_id);
            CREATE INDEX idx_messages_thread_index
                ON messages(user_id, store_id, thread_index_header);

            CREATE INDEX idx_messages_thread_id ON messages(thread_id);
            "#,
        ),
    ])
}

const MESSAGE_COLUMNS: &str = "id, thread_id, user_id, store_id, provider_message_id, \
     message_id_header, in_reply_to_header, references_header, thread_index_header, \
     provider_conversation_id, subject, from_address, to_addresses, received_at, assigned_to";

/// SQLite-backed conversation store.
///
/// The connection is serialized behind a mutex; thread-root allocation runs
/// in a transaction with an ON CONFLICT insert, so the find-or-create stays
/// atomic even across processes sharing the database file.
pub struct SqliteConversationStore {
    conn: Mutex<Connection>,
}

impl SqliteConversationStore {
    /// Open (or create) a conversation database at `db_path`
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL for concurrent readers during ingest writes; NORMAL sync is
        // safe under WAL; foreign_keys must be on for the thread FKs.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query_messages(
        &self,
        conn: &Connection,
        where_clause: &str,
        bind: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<StoredMessage>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE {where_clause}");
        let mut stmt = conn.prepare(&sql)?;

        let messages = stmt
            .query_map(bind, load_message)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(messages)
    }
}

/// Map a full message row (MESSAGE_COLUMNS order) to a StoredMessage
fn load_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let received_at_str: String = row.get(13)?;
    let received_at = parse_timestamp(&received_at_str);

    Ok(StoredMessage {
        id: MessageId::new(row.get::<_, String>(0)?),
        thread_id: ThreadId::new(row.get::<_, String>(1)?),
        scope: Scope::new(row.get::<_, String>(2)?, row.get::<_, String>(3)?),
        provider_message_id: row.get(4)?,
        message_id_header: row.get(5)?,
        in_reply_to_header: row.get(6)?,
        references_header: row.get(7)?,
        thread_index_header: row.get(8)?,
        provider_conversation_id: row.get(9)?,
        subject: row.get(10)?,
        from_address: row.get(11)?,
        to_addresses: row.get(12)?,
        received_at,
        assigned_to: row.get(14)?,
    })
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Only the `(user_id, provider_message_id)` dedup index maps to
/// [`DuplicateDeliveryError`]; any other constraint failure (say a colliding
/// internal id) stays a genuine insert error.
fn is_duplicate_delivery(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, Some(msg))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                && msg.contains("messages.provider_message_id")
    )
}

impl ConversationStore for SqliteConversationStore {
    fn messages_with_message_id(
        &self,
        scope: &Scope,
        message_id_header: &str,
    ) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock().unwrap();
        self.query_messages(
            &conn,
            "user_id = ? AND store_id = ? AND message_id_header = ?",
            &[&scope.user_id, &scope.store_id, &message_id_header],
        )
    }

    fn messages_with_any_message_id(
        &self,
        scope: &Scope,
        message_ids: &[&str],
    ) -> Result<Vec<StoredMessage>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().unwrap();

        let placeholders = vec!["?"; message_ids.len()].join(", ");
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE user_id = ? AND store_id = ? AND message_id_header IN ({placeholders})"
        );

        let mut stmt = conn.prepare(&sql)?;
        let bind = std::iter::once(scope.user_id.as_str())
            .chain(std::iter::once(scope.store_id.as_str()))
            .chain(message_ids.iter().copied());

        let messages = stmt
            .query_map(params_from_iter(bind), load_message)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(messages)
    }

    fn messages_with_conversation_id(
        &self,
        scope: &Scope,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock().unwrap();
        self.query_messages(
            &conn,
            "user_id = ? AND store_id = ? AND provider_conversation_id = ?",
            &[&scope.user_id, &scope.store_id, &conversation_id],
        )
    }

    fn messages_with_thread_index(
        &self,
        scope: &Scope,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock().unwrap();

        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE user_id = ? AND store_id = ? AND thread_index_header IS NOT NULL
             ORDER BY received_at DESC
             LIMIT ?"
        );
        let mut stmt = conn.prepare(&sql)?;

        let messages = stmt
            .query_map(
                params![scope.user_id, scope.store_id, limit as i64],
                load_message,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(messages)
    }

    fn find_or_create_thread_root(
        &self,
        scope: &Scope,
        root_key: &str,
        subject: &str,
        created_at: DateTime<Utc>,
    ) -> Result<ThreadId> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        // Insert a candidate thread first so the root row's FK holds, then
        // claim the root. If another delivery already claimed it, the ON
        // CONFLICT insert is a no-op and the orphan candidate is removed.
        let candidate = ThreadId::new(Uuid::new_v4().to_string());

        tx.execute(
            "INSERT INTO threads (id, user_id, store_id, subject, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                candidate.as_str(),
                scope.user_id,
                scope.store_id,
                subject,
                created_at.to_rfc3339(),
            ],
        )?;

        let claimed = tx.execute(
            "INSERT INTO thread_roots (user_id, store_id, root_key, thread_id)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id, store_id, root_key) DO NOTHING",
            params![scope.user_id, scope.store_id, root_key, candidate.as_str()],
        )?;

        let thread_id = if claimed == 0 {
            tx.execute("DELETE FROM threads WHERE id = ?", [candidate.as_str()])?;

            let existing: String = tx.query_row(
                "SELECT thread_id FROM thread_roots
                 WHERE user_id = ? AND store_id = ? AND root_key = ?",
                params![scope.user_id, scope.store_id, root_key],
                |row| row.get(0),
            )?;
            log::debug!("[STORE] thread root {root_key:?} already claimed by {existing}");
            ThreadId::new(existing)
        } else {
            candidate
        };

        tx.commit()?;
        Ok(thread_id)
    }

    fn latest_assignee_in_thread(
        &self,
        scope: &Scope,
        thread_id: &ThreadId,
    ) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();

        let assignee: Option<String> = conn
            .query_row(
                "SELECT assigned_to FROM messages
                 WHERE thread_id = ? AND user_id = ? AND store_id = ?
                   AND assigned_to IS NOT NULL
                 ORDER BY received_at DESC
                 LIMIT 1",
                params![thread_id.as_str(), scope.user_id, scope.store_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(assignee)
    }

    fn insert_message(&self, message: StoredMessage) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let result = conn.execute(
            "INSERT INTO messages
             (id, thread_id, user_id, store_id, provider_message_id,
              message_id_header, in_reply_to_header, references_header,
              thread_index_header, provider_conversation_id,
              subject, from_address, to_addresses, received_at, assigned_to)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                message.id.as_str(),
                message.thread_id.as_str(),
                message.scope.user_id,
                message.scope.store_id,
                message.provider_message_id,
                message.message_id_header,
                message.in_reply_to_header,
                message.references_header,
                message.thread_index_header,
                message.provider_conversation_id,
                message.subject,
                message.from_address,
                message.to_addresses,
                message.received_at.to_rfc3339(),
                message.assigned_to,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_delivery(&e) => Err(anyhow::Error::new(DuplicateDeliveryError)),
            Err(e) => Err(e).context("Failed to insert message"),
        }
    }

    fn assign_message(&self, id: &MessageId, assignee: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE messages SET assigned_to = ? WHERE id = ?",
            params![assignee, id.as_str()],
        )?;
        if updated == 0 {
            bail!("No message with id {} to assign", id.as_str());
        }
        Ok(())
    }

    fn has_provider_message(&self, user_id: &str, provider_message_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE user_id = ? AND provider_message_id = ?",
            params![user_id, provider_message_id],
            |row| row.get(0),
        )?;

        Ok(count > 0)
    }

    fn get_thread(&self, id: &ThreadId) -> Result<Option<Thread>> {
        let conn = self.conn.lock().unwrap();

        let row: Option<(String, String, String, String, String)> = conn
            .query_row(
                "SELECT id, user_id, store_id, subject, created_at FROM threads WHERE id = ?",
                [id.as_str()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, user_id, store_id, subject, created_at_str)) = row else {
            return Ok(None);
        };

        Ok(Some(Thread {
            id: ThreadId::new(id),
            scope: Scope::new(user_id, store_id),
            subject,
            created_at: parse_timestamp(&created_at_str),
        }))
    }

    fn list_messages_for_thread(&self, thread_id: &ThreadId) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock().unwrap();

        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE thread_id = ? ORDER BY received_at ASC"
        );
        let mut stmt = conn.prepare(&sql)?;

        let messages = stmt
            .query_map([thread_id.as_str()], load_message)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(messages)
    }

    fn count_threads(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM threads", [], |row| row.get(0))?;

        Ok(count as usize)
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            "DELETE FROM messages;
             DELETE FROM thread_roots;
             DELETE FROM threads;",
        )?;

        Ok(())
    }
}
