//! Memory entries and the search surface

use chrono::{DateTime, Utc};
use metis_core::Content;

/// One persisted conversation turn
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    /// Structured turn content
    pub content: Content,
    /// Turn author, when recorded
    pub author: Option<String>,
    /// Turn timestamp
    pub timestamp: DateTime<Utc>,
}

/// A memory search request, scoped to one (app, user)
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    /// Owning application
    pub app_name: String,
    /// Owning user
    pub user_id: String,
    /// Free-text query; empty returns the most recent entries
    pub query: String,
}

/// Search results
#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    /// Matching entries, best first
    pub memories: Vec<MemoryEntry>,
}
