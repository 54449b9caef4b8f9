//! Header extraction for inbound messages
//!
//! Resolves the canonical threading headers from three priority-ordered
//! sources, highest first:
//!
//! 1. The embedded sentinel block our own outbound path writes into HTML
//!    bodies (survives providers that strip real headers on round-trip)
//! 2. Provider-namespaced `X-Threadline-*` headers we set when sending
//!    through the provider's API
//! 3. The provider's standard exposed headers, for genuine external mail
//!
//! Each field is merged independently, so a message can take its Message-ID
//! from the embedded block and its Thread-Index from a standard header.
//! Extraction never fails; a malformed source yields absent fields.

mod embedded;

pub use embedded::{EMBEDDED_BLOCK_BEGIN, EMBEDDED_BLOCK_END, render_embedded_block};

use serde::{Deserialize, Serialize};

use crate::models::ThreadingHeaders;

/// Prefix for the vendor-extension headers our send path attaches
pub const NAMESPACED_HEADER_PREFIX: &str = "X-Threadline-";

/// A single provider metadata header as delivered by webhook or sync
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHeader {
    pub name: String,
    pub value: String,
}

impl ProviderHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Extract threading headers from provider metadata and the HTML body.
///
/// Sources are tried in priority order per field; the first source that
/// produced a value for a field wins. Absent stays absent all the way
/// through, never an empty string.
pub fn extract_threading_headers(
    provider_headers: &[ProviderHeader],
    html_body: &str,
) -> ThreadingHeaders {
    // Ordered highest-priority first; adding a source means adding an entry
    let sources = [
        embedded::extract_embedded_headers(html_body),
        namespaced_headers(provider_headers),
        standard_headers(provider_headers),
    ];

    merge_sources(&sources)
}

/// Per-field first-wins merge over an ordered source list
fn merge_sources(sources: &[ThreadingHeaders]) -> ThreadingHeaders {
    let pick = |field: fn(&ThreadingHeaders) -> &Option<String>| {
        sources.iter().find_map(|source| field(source).clone())
    };

    ThreadingHeaders {
        message_id: pick(|s| &s.message_id),
        in_reply_to: pick(|s| &s.in_reply_to),
        references: pick(|s| &s.references),
        thread_index: pick(|s| &s.thread_index),
        thread_topic: pick(|s| &s.thread_topic),
    }
}

/// Case-insensitive lookup of a header value by name
fn extract_header(headers: &[ProviderHeader], name: &str) -> Option<String> {
    headers.iter().find_map(|h| {
        if h.name.eq_ignore_ascii_case(name) {
            ThreadingHeaders::normalize(&h.value)
        } else {
            None
        }
    })
}

/// Source 2: headers our own send path namespaced with the vendor prefix
fn namespaced_headers(headers: &[ProviderHeader]) -> ThreadingHeaders {
    let lookup = |suffix: &str| {
        extract_header(headers, &format!("{}{}", NAMESPACED_HEADER_PREFIX, suffix))
    };

    ThreadingHeaders {
        message_id: lookup("Message-ID"),
        in_reply_to: lookup("In-Reply-To"),
        references: lookup("References"),
        thread_index: lookup("Thread-Index"),
        thread_topic: lookup("Thread-Topic"),
    }
}

/// Source 3: the provider's normal exposed header list
fn standard_headers(headers: &[ProviderHeader]) -> ThreadingHeaders {
    ThreadingHeaders {
        message_id: extract_header(headers, "Message-ID"),
        in_reply_to: extract_header(headers, "In-Reply-To"),
        references: extract_header(headers, "References"),
        thread_index: extract_header(headers, "Thread-Index"),
        thread_topic: extract_header(headers, "Thread-Topic"),
    }
}
