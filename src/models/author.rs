//! Author model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A catalog author. Deleting an author deletes their books.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    /// Cleaned (HTML-escaped) name
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Author row annotated with the number of books they own
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorWithCount {
    #[serde(flatten)]
    pub author: Author,
    pub book_count: i64,
}
