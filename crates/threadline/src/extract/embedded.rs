//! Embedded header block parsing and rendering
//!
//! Some providers rewrite or drop standard headers when a message is
//! round-tripped through their compose UI, so our outbound path re-embeds
//! the original threading headers in the HTML body between two fixed
//! HTML-comment sentinels, one `Key: value` pair per line. This module owns
//! both halves of that format; parser and renderer must change together.

use crate::models::ThreadingHeaders;

/// Start sentinel written by the outbound send path
pub const EMBEDDED_BLOCK_BEGIN: &str = "<!--X-THREADLINE-HEADERS-BEGIN-->";
/// End sentinel written by the outbound send path
pub const EMBEDDED_BLOCK_END: &str = "<!--X-THREADLINE-HEADERS-END-->";

/// Source 1: parse the embedded sentinel block out of an HTML body.
///
/// A missing block, or a start sentinel with no matching end sentinel,
/// yields all-absent headers. The block is never partially parsed: either
/// both sentinels are present and well-ordered or the block does not exist.
pub fn extract_embedded_headers(html_body: &str) -> ThreadingHeaders {
    let Some(block) = find_block(html_body) else {
        return ThreadingHeaders::default();
    };

    let mut headers = ThreadingHeaders::default();
    for line in block.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            log::debug!("[EXTRACT] skipping malformed embedded header line: {line:?}");
            continue;
        };

        let value = ThreadingHeaders::normalize(value);
        match key.trim() {
            k if k.eq_ignore_ascii_case("Message-ID") => headers.message_id = value,
            k if k.eq_ignore_ascii_case("In-Reply-To") => headers.in_reply_to = value,
            k if k.eq_ignore_ascii_case("References") => headers.references = value,
            k if k.eq_ignore_ascii_case("Thread-Index") => headers.thread_index = value,
            k if k.eq_ignore_ascii_case("Thread-Topic") => headers.thread_topic = value,
            k => log::debug!("[EXTRACT] ignoring unknown embedded header key: {k:?}"),
        }
    }

    headers
}

/// Locate the content between the sentinels, if both are present in order
fn find_block(html_body: &str) -> Option<&str> {
    let start = html_body.find(EMBEDDED_BLOCK_BEGIN)?;
    let content_start = start + EMBEDDED_BLOCK_BEGIN.len();

    let Some(end_offset) = html_body[content_start..].find(EMBEDDED_BLOCK_END) else {
        // Truncated block: treat as not found rather than parse half of it
        log::debug!("[EXTRACT] embedded header block has no end sentinel; ignoring");
        return None;
    };

    Some(&html_body[content_start..content_start + end_offset])
}

/// Render the embedded block the outbound send path appends to HTML bodies.
///
/// Emits only present fields. The output must stay parseable by
/// [`extract_embedded_headers`].
pub fn render_embedded_block(headers: &ThreadingHeaders) -> String {
    let mut lines = Vec::new();

    let mut push = |key: &str, value: &Option<String>| {
        if let Some(value) = value {
            lines.push(format!("{}: {}", key, value));
        }
    };

    push("Message-ID", &headers.message_id);
    push("In-Reply-To", &headers.in_reply_to);
    push("References", &headers.references);
    push("Thread-Index", &headers.thread_index);
    push("Thread-Topic", &headers.thread_topic);

    format!(
        "{}\n{}\n{}",
        EMBEDDED_BLOCK_BEGIN,
        lines.join("\n"),
        EMBEDDED_BLOCK_END
    )
}
