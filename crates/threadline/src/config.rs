//! Resolver tuning knobs

use serde::Deserialize;

/// Configuration for thread resolution.
///
/// Deserializable so the hosting service can load it alongside its own
/// settings; `Default` gives the production values.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Minimum shared prefix, in decoded bytes, before two Thread-Index
    /// values are considered related. 22 bytes is the size of the root
    /// block, so two indexes only correlate when they share a complete
    /// root. Prefix matching is the lowest-confidence rule and coincidental
    /// short prefixes do collide across unrelated conversations.
    pub min_thread_index_prefix_bytes: usize,
    /// Most stored Thread-Index candidates loaded per resolution, newest
    /// first. Bounds the prefix scan on mailboxes with long Exchange
    /// histories; older candidates beyond the cap are simply not considered.
    pub thread_index_candidate_cap: usize,
    /// When false, skip the assignment-inheritance side query entirely
    pub inherit_assignments: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_thread_index_prefix_bytes: 22,
            thread_index_candidate_cap: 256,
            inherit_assignments: true,
        }
    }
}
