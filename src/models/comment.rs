//! Comment model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A comment on a post, owned by its author.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author_id: i64,
    pub author_username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
