//! Storage traits and implementations
//!
//! Defines the conversation-store abstraction the resolver reads from and
//! the ingestion pipeline writes to. The trait-based design allows swapping
//! between the in-memory and SQLite implementations.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryConversationStore;
pub use sqlite::SqliteConversationStore;
pub use traits::{ConversationStore, DuplicateDeliveryError};
