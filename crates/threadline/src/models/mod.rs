//! Domain models for conversation threading

mod headers;
mod message;
mod scope;
mod thread;

pub use headers::ThreadingHeaders;
pub use message::{MessageId, StoredMessage, StoredMessageBuilder};
pub use scope::Scope;
pub use thread::{Thread, ThreadId};
