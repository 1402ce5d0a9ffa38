//! Knowledge store — versioned, vector-embedded text entries.
//!
//! The write path ([`store`]) handles CRUD with scope-based visibility and
//! soft delete; the read path ([`search`]) runs cosine KNN over the vec0
//! index with SQL post-filters and relevance decay. Type definitions live
//! in [`types`].

pub mod search;
pub mod store;
pub mod types;

/// The well-known admin identity that bypasses per-resource ACLs in
/// knowledge and secret access checks. Kept as a literal rather than
/// configuration to preserve the existing access semantics.
pub const ADMIN_AGENT: &str = "warren";

/// Maximum knowledge content size in bytes (100 KiB).
pub const MAX_CONTENT_BYTES: usize = 102_400;
