//! Comment service

use crate::db::repositories::{CommentRepository, PostRepository};
use crate::models::{Comment, ListParams, PagedResult};
use crate::services::validation::{clean_comment, FieldErrors};
use anyhow::Context;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CommentServiceError {
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Comment not found")]
    NotFound,

    #[error("Post not found")]
    PostNotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommentInput {
    pub content: Option<String>,
}

pub struct CommentService {
    comment_repo: Arc<dyn CommentRepository>,
    post_repo: Arc<dyn PostRepository>,
}

impl CommentService {
    pub fn new(comment_repo: Arc<dyn CommentRepository>, post_repo: Arc<dyn PostRepository>) -> Self {
        Self {
            comment_repo,
            post_repo,
        }
    }

    /// Comments of a post, oldest first
    pub async fn list_for_post(
        &self,
        post_id: i64,
        params: &ListParams,
    ) -> Result<PagedResult<Comment>, CommentServiceError> {
        self.ensure_post(post_id).await?;
        Ok(self
            .comment_repo
            .list_for_post(post_id, params)
            .await
            .context("Failed to list comments")?)
    }

    pub async fn get(&self, id: i64) -> Result<Comment, CommentServiceError> {
        self.comment_repo
            .get_by_id(id)
            .await
            .context("Failed to get comment")?
            .ok_or(CommentServiceError::NotFound)
    }

    pub async fn create(
        &self,
        post_id: i64,
        author_id: i64,
        input: CommentInput,
    ) -> Result<Comment, CommentServiceError> {
        let content = validate(&input)?;
        self.ensure_post(post_id).await?;

        let comment = self
            .comment_repo
            .create(post_id, author_id, &content)
            .await
            .context("Failed to create comment")?;
        tracing::info!(comment_id = comment.id, post_id, "Comment created");
        Ok(comment)
    }

    /// Ownership is checked by the caller
    pub async fn update(&self, id: i64, input: CommentInput) -> Result<Comment, CommentServiceError> {
        let content = validate(&input)?;
        self.comment_repo
            .update(id, &content)
            .await
            .context("Failed to update comment")?
            .ok_or(CommentServiceError::NotFound)
    }

    pub async fn delete(&self, id: i64) -> Result<(), CommentServiceError> {
        let deleted = self
            .comment_repo
            .delete(id)
            .await
            .context("Failed to delete comment")?;
        if deleted {
            Ok(())
        } else {
            Err(CommentServiceError::NotFound)
        }
    }

    async fn ensure_post(&self, post_id: i64) -> Result<(), CommentServiceError> {
        self.post_repo
            .get_by_id(post_id)
            .await
            .context("Failed to get post")?
            .map(|_| ())
            .ok_or(CommentServiceError::PostNotFound)
    }
}

fn validate(input: &CommentInput) -> Result<String, CommentServiceError> {
    let Some(raw) = &input.content else {
        return Err(CommentServiceError::Validation(FieldErrors::single(
            "content",
            "This field is required.",
        )));
    };
    clean_comment(raw)
        .map_err(|message| CommentServiceError::Validation(FieldErrors::single("content", message)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::session::test_support::insert_user;
    use crate::db::repositories::{SqlxCommentRepository, SqlxPostRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::PostRecord;

    async fn setup() -> (CommentService, i64, i64) {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let user_id = insert_user(&pool, "commenter").await;
        let posts = SqlxPostRepository::boxed(pool.clone());
        let post = posts
            .create(
                user_id,
                &PostRecord {
                    title: "Post".into(),
                    content: "Body".into(),
                    tags: vec![],
                },
            )
            .await
            .unwrap();
        let service = CommentService::new(SqlxCommentRepository::boxed(pool), posts);
        (service, post.id, user_id)
    }

    fn content(text: &str) -> CommentInput {
        CommentInput {
            content: Some(text.into()),
        }
    }

    #[tokio::test]
    async fn test_create_and_list_comments() {
        let (service, post_id, user_id) = setup().await;
        service.create(post_id, user_id, content("  Nice post ")).await.unwrap();
        service.create(post_id, user_id, content("Thanks")).await.unwrap();

        let page = service
            .list_for_post(post_id, &ListParams::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].content, "Nice post");
    }

    #[tokio::test]
    async fn test_comment_validation() {
        let (service, post_id, user_id) = setup().await;
        for bad in [
            CommentInput::default(),
            content("   "),
            content("<script>alert(1)</script>"),
            content(&"x".repeat(2001)),
        ] {
            assert!(matches!(
                service.create(post_id, user_id, bad).await,
                Err(CommentServiceError::Validation(e)) if e.contains("content")
            ));
        }
    }

    #[tokio::test]
    async fn test_comment_on_missing_post() {
        let (service, _, user_id) = setup().await;
        assert!(matches!(
            service.create(999, user_id, content("Hello")).await,
            Err(CommentServiceError::PostNotFound)
        ));
        assert!(matches!(
            service.list_for_post(999, &ListParams::default()).await,
            Err(CommentServiceError::PostNotFound)
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (service, post_id, user_id) = setup().await;
        let comment = service.create(post_id, user_id, content("Frist")).await.unwrap();
        let updated = service.update(comment.id, content("First")).await.unwrap();
        assert_eq!(updated.content, "First");

        service.delete(comment.id).await.unwrap();
        assert!(matches!(service.get(comment.id).await, Err(CommentServiceError::NotFound)));
        assert!(matches!(service.delete(comment.id).await, Err(CommentServiceError::NotFound)));
    }
}
