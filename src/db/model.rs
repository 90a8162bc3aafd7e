//! Row models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use chrono::{DateTime, Utc};

/// A due task as stored in the `tasks` table.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: i64,
    pub name: Option<String>,
    pub kind: String,
    pub payload: String,
    pub attempt: i32,
}

/// A published static artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticContent {
    pub path: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub indexed: bool,
}

/// Restricts which published posts a post scan sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostFilter {
    All,
    Tag(String),
    /// Half-open publish-time range `[start, end)`.
    Published {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}
