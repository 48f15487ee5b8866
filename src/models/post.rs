//! Blog post model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Tag;

/// A blog post owned by its author.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub author_id: i64,
    pub author_username: String,
    /// Set once, when the post is created
    pub published_date: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tags: Vec<Tag>,
    pub comment_count: i64,
}

/// Validated values ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRecord {
    pub title: String,
    pub content: String,
    /// Tag names; missing tags are created, existing ones reused by slug
    pub tags: Vec<String>,
}

/// A search term in both forms it is stored in. Titles are stored
/// escaped; content and tag names are stored as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTerm {
    pub raw: String,
    pub escaped: String,
}

/// Which posts a list request covers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PostScope {
    #[default]
    All,
    /// Case-insensitive match on title, content or a tag name
    Search(SearchTerm),
    /// Posts carrying the tag with this slug
    Tag(String),
    /// Posts written by one user
    Author(i64),
}
