//! Threadline - conversation threading core for a multi-tenant
//! support-mail platform
//!
//! This crate provides the threading logic shared by the webhook and
//! polling-sync ingestion paths:
//! - Domain models (ThreadingHeaders, StoredMessage, Thread, Scope)
//! - Multi-source header extraction (embedded block, namespaced, standard)
//! - Deterministic thread resolution with assignment inheritance
//! - Storage trait abstractions with in-memory and SQLite backends
//! - Idempotent ingestion pipeline
//!
//! This crate has no UI or HTTP dependencies; the hosting service invokes
//! it in-process from its delivery handlers.

pub mod config;
pub mod extract;
pub mod ingest;
pub mod models;
pub mod resolve;
pub mod storage;

pub use config::ResolverConfig;
pub use extract::{
    EMBEDDED_BLOCK_BEGIN, EMBEDDED_BLOCK_END, NAMESPACED_HEADER_PREFIX, ProviderHeader,
    extract_threading_headers, render_embedded_block,
};
pub use ingest::{
    DEFAULT_SUBJECT, InboundEmail, IngestOutcome, IngestStats, ingest_batch, ingest_email,
};
pub use models::{MessageId, Scope, StoredMessage, Thread, ThreadId, ThreadingHeaders};
pub use resolve::{
    MatchRule, Resolution, ResolutionRequest, resolve_thread, split_references,
};
pub use storage::{
    ConversationStore, DuplicateDeliveryError, InMemoryConversationStore,
    SqliteConversationStore,
};
