//! Book model and list filters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A catalog book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    /// Cleaned (HTML-escaped) title
    pub title: String,
    pub author_id: i64,
    /// Name of the owning author, joined in on read
    pub author_name: String,
    pub publication_year: i32,
    /// Exactly 13 characters when present, unique across books
    pub isbn: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Author of a book about to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookAuthor {
    Existing(i64),
    /// Inserted in the same transaction as the book
    New(String),
}

/// Validated values ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookRecord {
    pub title: String,
    pub author: BookAuthor,
    pub publication_year: i32,
    pub isbn: Option<String>,
}

/// Sort order for the book list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BookOrdering {
    #[default]
    TitleAsc,
    TitleDesc,
    YearAsc,
    YearDesc,
    AuthorAsc,
    AuthorDesc,
}

impl BookOrdering {
    /// Parse an `ordering` query value such as `-publication_year`
    pub fn from_param(value: &str) -> Option<Self> {
        match value.trim() {
            "title" => Some(Self::TitleAsc),
            "-title" => Some(Self::TitleDesc),
            "publication_year" => Some(Self::YearAsc),
            "-publication_year" => Some(Self::YearDesc),
            "author" => Some(Self::AuthorAsc),
            "-author" => Some(Self::AuthorDesc),
            _ => None,
        }
    }

    /// ORDER BY clause. Only ever one of these fixed strings, never user input.
    pub fn sql(&self) -> &'static str {
        match self {
            Self::TitleAsc => "b.title ASC, b.id ASC",
            Self::TitleDesc => "b.title DESC, b.id DESC",
            Self::YearAsc => "b.publication_year ASC, b.id ASC",
            Self::YearDesc => "b.publication_year DESC, b.id DESC",
            Self::AuthorAsc => "a.name ASC, b.id ASC",
            Self::AuthorDesc => "a.name DESC, b.id DESC",
        }
    }
}

/// Filters accepted by the book list
#[derive(Debug, Clone, Default)]
pub struct BookFilter {
    /// Case-insensitive substring of the title
    pub title: Option<String>,
    pub author_id: Option<i64>,
    pub publication_year: Option<i32>,
    /// Case-insensitive substring of title or author name
    pub search: Option<String>,
    pub ordering: BookOrdering,
}
