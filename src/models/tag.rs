//! Tag model

use serde::{Deserialize, Serialize};

/// A post tag. Names are reused case-insensitively through the slug.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

/// Tag annotated with the number of posts carrying it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagWithCount {
    #[serde(flatten)]
    pub tag: Tag,
    pub post_count: i64,
}

/// Derive the URL slug of a tag name.
///
/// Lowercases, keeps alphanumerics (including non-ASCII letters) and folds
/// every run of other characters into a single hyphen.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.trim().to_lowercase().chars() {
        if c.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    slug
}
