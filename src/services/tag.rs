//! Tag service

use crate::db::repositories::{PostRepository, TagRepository};
use crate::models::{slugify, ListParams, PagedResult, Post, PostScope, Tag, TagWithCount};
use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum TagServiceError {
    #[error("Tag not found")]
    NotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// A tag with one page of the posts carrying it
#[derive(Debug, Clone, Serialize)]
pub struct TaggedPosts {
    pub tag: Tag,
    pub posts: PagedResult<Post>,
}

pub struct TagService {
    tag_repo: Arc<dyn TagRepository>,
    post_repo: Arc<dyn PostRepository>,
}

impl TagService {
    pub fn new(tag_repo: Arc<dyn TagRepository>, post_repo: Arc<dyn PostRepository>) -> Self {
        Self { tag_repo, post_repo }
    }

    pub async fn list(&self) -> Result<Vec<TagWithCount>, TagServiceError> {
        Ok(self
            .tag_repo
            .list_with_counts()
            .await
            .context("Failed to list tags")?)
    }

    /// Posts tagged with `slug`, newest first. The slug is normalised, so
    /// `Rust` finds the `rust` tag.
    pub async fn posts(&self, slug: &str, params: &ListParams) -> Result<TaggedPosts, TagServiceError> {
        let slug = slugify(slug);
        let tag = self
            .tag_repo
            .get_by_slug(&slug)
            .await
            .context("Failed to get tag")?
            .ok_or(TagServiceError::NotFound)?;

        let posts = self
            .post_repo
            .list(&PostScope::Tag(tag.slug.clone()), params)
            .await
            .context("Failed to list tagged posts")?;
        Ok(TaggedPosts { tag, posts })
    }
}
