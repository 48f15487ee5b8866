//! Post service

use crate::db::repositories::PostRepository;
use crate::models::{ListParams, PagedResult, Post, PostRecord, PostScope, SearchTerm};
use crate::services::validation::{
    clean_post_content, clean_search_raw, clean_tags, clean_title, html_escape, FieldErrors,
};
use anyhow::Context;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum PostServiceError {
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Post not found")]
    NotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Submitted post fields
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostInput {
    pub title: Option<String>,
    pub content: Option<String>,
    /// Replaces the tag set when given
    pub tags: Option<Vec<String>>,
}

/// Query string of the post list
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostListQuery {
    /// Tag slug
    pub tag: Option<String>,
    /// Author user id
    pub author: Option<i64>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl PostListQuery {
    pub fn params(&self) -> ListParams {
        ListParams::new(self.page.unwrap_or(1), self.page_size.unwrap_or(10))
    }
}

/// Query string of the post search
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostSearchQuery {
    pub q: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

pub struct PostService {
    repo: Arc<dyn PostRepository>,
}

impl PostService {
    pub fn new(repo: Arc<dyn PostRepository>) -> Self {
        Self { repo }
    }

    /// Newest first. A tag filter wins over an author filter.
    pub async fn list(&self, query: &PostListQuery) -> Result<PagedResult<Post>, PostServiceError> {
        let scope = match (&query.tag, query.author) {
            (Some(slug), _) => PostScope::Tag(slug.trim().to_lowercase()),
            (None, Some(author_id)) => PostScope::Author(author_id),
            (None, None) => PostScope::All,
        };
        self.list_scope(&scope, &query.params()).await
    }

    /// Match `q` against titles, content and tag names. A blank query lists every post.
    pub async fn search(
        &self,
        query: &PostSearchQuery,
    ) -> Result<PagedResult<Post>, PostServiceError> {
        let term = clean_search_raw(query.q.as_deref())
            .map_err(|message| PostServiceError::Validation(FieldErrors::single("q", message)))?;
        let scope = term
            .map(|raw| {
                PostScope::Search(SearchTerm {
                    escaped: html_escape(&raw),
                    raw,
                })
            })
            .unwrap_or_default();
        let params = ListParams::new(query.page.unwrap_or(1), query.page_size.unwrap_or(10));
        self.list_scope(&scope, &params).await
    }

    pub async fn list_scope(
        &self,
        scope: &PostScope,
        params: &ListParams,
    ) -> Result<PagedResult<Post>, PostServiceError> {
        Ok(self
            .repo
            .list(scope, params)
            .await
            .context("Failed to list posts")?)
    }

    pub async fn get(&self, id: i64) -> Result<Post, PostServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get post")?
            .ok_or(PostServiceError::NotFound)
    }

    pub async fn create(&self, author_id: i64, input: PostInput) -> Result<Post, PostServiceError> {
        let record = validate(input, None)?;
        let post = self
            .repo
            .create(author_id, &record)
            .await
            .context("Failed to create post")?;
        tracing::info!(post_id = post.id, author_id, "Post created");
        Ok(post)
    }

    /// Replace a post, or with `partial` change only the given fields.
    /// Ownership is checked by the caller.
    pub async fn update(
        &self,
        existing: &Post,
        input: PostInput,
        partial: bool,
    ) -> Result<Post, PostServiceError> {
        let record = validate(input, partial.then_some(existing))?;
        self.repo
            .update(existing.id, &record)
            .await
            .context("Failed to update post")?
            .ok_or(PostServiceError::NotFound)
    }

    pub async fn delete(&self, id: i64) -> Result<(), PostServiceError> {
        let deleted = self.repo.delete(id).await.context("Failed to delete post")?;
        if !deleted {
            return Err(PostServiceError::NotFound);
        }
        tracing::info!(post_id = id, "Post deleted");
        Ok(())
    }
}

fn validate(input: PostInput, fallback: Option<&Post>) -> Result<PostRecord, PostServiceError> {
    let mut errors = FieldErrors::new();

    let title = match &input.title {
        Some(raw) => errors.check("title", clean_title(raw)),
        None => fallback.map(|p| p.title.clone()),
    };
    let content = match &input.content {
        Some(raw) => errors.check("content", clean_post_content(raw)),
        None => fallback.map(|p| p.content.clone()),
    };
    let tags = match &input.tags {
        Some(raw) => errors.check("tags", clean_tags(raw)),
        None => Some(
            fallback
                .map(|p| p.tags.iter().map(|t| t.name.clone()).collect())
                .unwrap_or_default(),
        ),
    };

    if input.title.is_none() && title.is_none() {
        errors.add("title", "This field is required.");
    }
    if input.content.is_none() && content.is_none() {
        errors.add("content", "This field is required.");
    }

    match (title, content, tags) {
        (Some(title), Some(content), Some(tags)) if errors.is_empty() => Ok(PostRecord {
            title,
            content,
            tags,
        }),
        _ => Err(PostServiceError::Validation(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::session::test_support::insert_user;
    use crate::db::repositories::SqlxPostRepository;
    use crate::db::{create_test_pool, migrations};

    async fn setup() -> (PostService, i64) {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let author_id = insert_user(&pool, "blogger").await;
        (PostService::new(SqlxPostRepository::boxed(pool)), author_id)
    }

    fn input(title: &str, content: &str, tags: &[&str]) -> PostInput {
        PostInput {
            title: Some(title.into()),
            content: Some(content.into()),
            tags: Some(tags.iter().map(|t| t.to_string()).collect()),
        }
    }

    #[tokio::test]
    async fn test_create_post() {
        let (service, author_id) = setup().await;
        let post = service
            .create(author_id, input("Hello World", "First post", &["Rust", "rust", "Web"]))
            .await
            .unwrap();
        assert_eq!(post.author_id, author_id);
        assert_eq!(post.author_username, "blogger");
        assert_eq!(post.tags.len(), 2);
    }

    #[tokio::test]
    async fn test_create_collects_errors() {
        let (service, author_id) = setup().await;
        let tags: Vec<String> = (0..11).map(|i| format!("tag{}", i)).collect();
        let result = service
            .create(
                author_id,
                PostInput {
                    title: Some("<script>alert(1)</script>".into()),
                    content: Some("   ".into()),
                    tags: Some(tags),
                },
            )
            .await;
        match result {
            Err(PostServiceError::Validation(errors)) => {
                assert!(errors.contains("title"));
                assert!(errors.contains("content"));
                assert!(errors.contains("tags"));
            }
            other => panic!("expected validation error, got {:?}", other.map(|p| p.id)),
        }
    }

    #[tokio::test]
    async fn test_partial_update_keeps_tags() {
        let (service, author_id) = setup().await;
        let post = service
            .create(author_id, input("Tagged Post", "Body", &["Rust"]))
            .await
            .unwrap();

        let updated = service
            .update(
                &post,
                PostInput {
                    content: Some("New body".into()),
                    ..PostInput::default()
                },
                true,
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "Tagged Post");
        assert_eq!(updated.content, "New body");
        assert_eq!(updated.tags[0].name, "Rust");
        assert_eq!(updated.published_date, post.published_date);
    }

    #[tokio::test]
    async fn test_full_update_requires_content() {
        let (service, author_id) = setup().await;
        let post = service
            .create(author_id, input("Some Post", "Body", &[]))
            .await
            .unwrap();
        let result = service
            .update(
                &post,
                PostInput {
                    title: Some("Renamed".into()),
                    ..PostInput::default()
                },
                false,
            )
            .await;
        assert!(matches!(result, Err(PostServiceError::Validation(e)) if e.contains("content")));
    }

    #[tokio::test]
    async fn test_list_search_and_tags() {
        let (service, author_id) = setup().await;
        service
            .create(author_id, input("Learning Rust", "Ownership", &["Rust"]))
            .await
            .unwrap();
        service
            .create(author_id, input("Gardening", "Tomatoes", &["Outdoors"]))
            .await
            .unwrap();

        let found = service
            .search(&PostSearchQuery {
                q: Some("TOMATO".into()),
                ..PostSearchQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(found.total, 1);
        assert_eq!(found.items[0].title, "Gardening");

        let tagged = service
            .list(&PostListQuery {
                tag: Some("Rust".into()),
                ..PostListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(tagged.total, 1);

        service
            .create(author_id, input("Old Records", "My rock & roll years, Jack's band", &[]))
            .await
            .unwrap();
        service
            .create(author_id, input("Rock & Roll", "Liner notes", &[]))
            .await
            .unwrap();
        for q in ["rock & roll", "jack's"] {
            let found = service
                .search(&PostSearchQuery {
                    q: Some(q.into()),
                    ..PostSearchQuery::default()
                })
                .await
                .unwrap();
            let expected = if q == "rock & roll" { 2 } else { 1 };
            assert_eq!(found.total, expected, "query {:?}", q);
        }

        let all = service
            .search(&PostSearchQuery::default())
            .await
            .unwrap();
        assert_eq!(all.total, 4);

        let too_long = service
            .search(&PostSearchQuery {
                q: Some("a".repeat(101)),
                ..PostSearchQuery::default()
            })
            .await;
        assert!(matches!(too_long, Err(PostServiceError::Validation(e)) if e.contains("q")));
    }

    #[tokio::test]
    async fn test_delete_missing_post() {
        let (service, _) = setup().await;
        assert!(matches!(service.delete(42).await, Err(PostServiceError::NotFound)));
        assert!(matches!(service.get(42).await, Err(PostServiceError::NotFound)));
    }
}
