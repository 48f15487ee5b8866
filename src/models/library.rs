//! Library and librarian models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A library shelving catalog books. A book may sit in many libraries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    pub id: i64,
    /// Cleaned (HTML-escaped) name; unique
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Library row annotated with the number of books it holds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryWithCount {
    #[serde(flatten)]
    pub library: Library,
    pub book_count: i64,
}

/// The one librarian a library may have
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Librarian {
    pub id: i64,
    pub name: String,
    pub library_id: i64,
    pub created_at: DateTime<Utc>,
}
