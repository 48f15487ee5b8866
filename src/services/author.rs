//! Author service

use crate::cache::{Cache, CacheLayer};
use crate::db::repositories::{AuthorRepository, BookRepository};
use crate::models::{Author, AuthorWithCount, Book, ListParams, PagedResult};
use crate::services::validation::{clean_author_name, FieldErrors};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum AuthorServiceError {
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Author not found")]
    NotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Author detail with their books nested
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorDetail {
    #[serde(flatten)]
    pub author: Author,
    pub books: Vec<Book>,
}

fn author_key(id: i64) -> String {
    format!("author:{}", id)
}

pub struct AuthorService {
    author_repo: Arc<dyn AuthorRepository>,
    book_repo: Arc<dyn BookRepository>,
    cache: Arc<Cache>,
}

impl AuthorService {
    pub fn new(
        author_repo: Arc<dyn AuthorRepository>,
        book_repo: Arc<dyn BookRepository>,
        cache: Arc<Cache>,
    ) -> Self {
        Self {
            author_repo,
            book_repo,
            cache,
        }
    }

    pub async fn list(
        &self,
        params: &ListParams,
    ) -> Result<PagedResult<AuthorWithCount>, AuthorServiceError> {
        Ok(self
            .author_repo
            .list(params)
            .await
            .context("Failed to list authors")?)
    }

    pub async fn get(&self, id: i64) -> Result<AuthorDetail, AuthorServiceError> {
        let key = author_key(id);
        if let Ok(Some(detail)) = self.cache.get::<AuthorDetail>(&key).await {
            return Ok(detail);
        }

        let author = self
            .author_repo
            .get_by_id(id)
            .await
            .context("Failed to get author")?
            .ok_or(AuthorServiceError::NotFound)?;
        let books = self
            .book_repo
            .list_by_author(id)
            .await
            .context("Failed to list author books")?;

        let detail = AuthorDetail { author, books };
        if let Err(e) = self.cache.set(&key, &detail, self.cache.default_ttl()).await {
            tracing::warn!("Failed to cache {}: {}", key, e);
        }
        Ok(detail)
    }

    pub async fn create(&self, name: &str) -> Result<Author, AuthorServiceError> {
        let name = self.validate_name(name, None).await?;
        let author = self
            .author_repo
            .create(&name)
            .await
            .context("Failed to create author")?;
        tracing::info!(author_id = author.id, "Author created");
        Ok(author)
    }

    pub async fn update(&self, id: i64, name: &str) -> Result<Author, AuthorServiceError> {
        let name = self.validate_name(name, Some(id)).await?;
        let author = self
            .author_repo
            .update(id, &name)
            .await
            .context("Failed to update author")?
            .ok_or(AuthorServiceError::NotFound)?;

        // Cached books embed the author name
        self.invalidate(&["author:*", "book:*"]).await;
        Ok(author)
    }

    /// Delete an author together with their books
    pub async fn delete(&self, id: i64) -> Result<(), AuthorServiceError> {
        let deleted = self
            .author_repo
            .delete(id)
            .await
            .context("Failed to delete author")?;
        if !deleted {
            return Err(AuthorServiceError::NotFound);
        }

        self.invalidate(&["author:*", "book:*"]).await;
        tracing::info!(author_id = id, "Author deleted");
        Ok(())
    }

    async fn validate_name(
        &self,
        raw: &str,
        exclude_id: Option<i64>,
    ) -> Result<String, AuthorServiceError> {
        let name = clean_author_name(raw)
            .map_err(|message| AuthorServiceError::Validation(FieldErrors::single("name", message)))?;

        let existing = self
            .author_repo
            .find_by_name(&name)
            .await
            .context("Failed to look up author")?;
        if existing.is_some_and(|a| Some(a.id) != exclude_id) {
            return Err(AuthorServiceError::Validation(FieldErrors::single(
                "name",
                "An author with this name already exists.",
            )));
        }
        Ok(name)
    }

    async fn invalidate(&self, patterns: &[&str]) {
        for pattern in patterns {
            if let Err(e) = self.cache.delete_pattern(pattern).await {
                tracing::warn!("Failed to invalidate {}: {}", pattern, e);
            }
        }
    }
}
