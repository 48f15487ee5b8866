//! Comment repository

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Comment, ListParams, PagedResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

const SELECT_BY_ID: &str = r#"
    SELECT c.id, c.post_id, c.author_id, u.username AS author_username, c.content,
           c.created_at, c.updated_at
    FROM comments c
    INNER JOIN users u ON u.id = c.author_id
    WHERE c.id = ?
"#;

const SELECT_FOR_POST: &str = r#"
    SELECT c.id, c.post_id, c.author_id, u.username AS author_username, c.content,
           c.created_at, c.updated_at
    FROM comments c
    INNER JOIN users u ON u.id = c.author_id
    WHERE c.post_id = ?
    ORDER BY c.created_at ASC, c.id ASC
    LIMIT ? OFFSET ?
"#;

const COUNT_FOR_POST: &str = "SELECT COUNT(*) FROM comments WHERE post_id = ?";

const INSERT_COMMENT: &str = r#"
    INSERT INTO comments (post_id, author_id, content, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?)
"#;

const UPDATE_COMMENT: &str = "UPDATE comments SET content = ?, updated_at = ? WHERE id = ?";

/// Comment repository trait
#[async_trait]
pub trait CommentRepository: Send + Sync {
    async fn create(&self, post_id: i64, author_id: i64, content: &str) -> Result<Comment>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Comment>>;

    /// Replace the text; `None` when the comment does not exist
    async fn update(&self, id: i64, content: &str) -> Result<Option<Comment>>;

    async fn delete(&self, id: i64) -> Result<bool>;

    /// Comments of one post, oldest first
    async fn list_for_post(&self, post_id: i64, params: &ListParams)
        -> Result<PagedResult<Comment>>;
}

/// SQLx-based comment repository implementation
pub struct SqlxCommentRepository {
    pool: DynDatabasePool,
}

impl SqlxCommentRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CommentRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl CommentRepository for SqlxCommentRepository {
    async fn create(&self, post_id: i64, author_id: i64, content: &str) -> Result<Comment> {
        let now = Utc::now();
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(INSERT_COMMENT)
                .bind(post_id)
                .bind(author_id)
                .bind(content)
                .bind(now)
                .bind(now)
                .execute(self.pool.sqlite_pool()?)
                .await
                .context("Failed to create comment")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(INSERT_COMMENT)
                .bind(post_id)
                .bind(author_id)
                .bind(content)
                .bind(now)
                .bind(now)
                .execute(self.pool.mysql_pool()?)
                .await
                .context("Failed to create comment")?
                .last_insert_id() as i64,
        };

        self.get_by_id(id)
            .await?
            .context("Comment disappeared after insert")
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Comment>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(SELECT_BY_ID)
                    .bind(id)
                    .fetch_optional(self.pool.sqlite_pool()?)
                    .await
                    .context("Failed to get comment by ID")?;
                row.as_ref().map(row_to_comment_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(SELECT_BY_ID)
                    .bind(id)
                    .fetch_optional(self.pool.mysql_pool()?)
                    .await
                    .context("Failed to get comment by ID")?;
                row.as_ref().map(row_to_comment_mysql).transpose()
            }
        }
    }

    async fn update(&self, id: i64, content: &str) -> Result<Option<Comment>> {
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(UPDATE_COMMENT)
                .bind(content)
                .bind(now)
                .bind(id)
                .execute(self.pool.sqlite_pool()?)
                .await
                .map(|_| ()),
            DatabaseDriver::Mysql => sqlx::query(UPDATE_COMMENT)
                .bind(content)
                .bind(now)
                .bind(id)
                .execute(self.pool.mysql_pool()?)
                .await
                .map(|_| ()),
        }
        .context("Failed to update comment")?;

        self.get_by_id(id).await
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query("DELETE FROM comments WHERE id = ?")
                .bind(id)
                .execute(self.pool.sqlite_pool()?)
                .await
                .map(|r| r.rows_affected()),
            DatabaseDriver::Mysql => sqlx::query("DELETE FROM comments WHERE id = ?")
                .bind(id)
                .execute(self.pool.mysql_pool()?)
                .await
                .map(|r| r.rows_affected()),
        }
        .context("Failed to delete comment")?;
        Ok(affected > 0)
    }

    async fn list_for_post(
        &self,
        post_id: i64,
        params: &ListParams,
    ) -> Result<PagedResult<Comment>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_for_post_sqlite(self.pool.sqlite_pool()?, post_id, params).await
            }
            DatabaseDriver::Mysql => {
                list_for_post_mysql(self.pool.mysql_pool()?, post_id, params).await
            }
        }
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn list_for_post_sqlite(
    pool: &SqlitePool,
    post_id: i64,
    params: &ListParams,
) -> Result<PagedResult<Comment>> {
    let rows = sqlx::query(SELECT_FOR_POST)
        .bind(post_id)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list comments")?;
    let items = rows
        .iter()
        .map(row_to_comment_sqlite)
        .collect::<Result<Vec<_>>>()?;

    let total: i64 = sqlx::query_scalar(COUNT_FOR_POST)
        .bind(post_id)
        .fetch_one(pool)
        .await
        .context("Failed to count comments")?;

    Ok(PagedResult::new(items, total, params))
}

fn row_to_comment_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Comment> {
    Ok(Comment {
        id: row.try_get("id")?,
        post_id: row.try_get("post_id")?,
        author_id: row.try_get("author_id")?,
        author_username: row.try_get("author_username")?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn list_for_post_mysql(
    pool: &MySqlPool,
    post_id: i64,
    params: &ListParams,
) -> Result<PagedResult<Comment>> {
    let rows = sqlx::query(SELECT_FOR_POST)
        .bind(post_id)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list comments")?;
    let items = rows
        .iter()
        .map(row_to_comment_mysql)
        .collect::<Result<Vec<_>>>()?;

    let total: i64 = sqlx::query_scalar(COUNT_FOR_POST)
        .bind(post_id)
        .fetch_one(pool)
        .await
        .context("Failed to count comments")?;

    Ok(PagedResult::new(items, total, params))
}

fn row_to_comment_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Comment> {
    Ok(Comment {
        id: row.try_get("id")?,
        post_id: row.try_get("post_id")?,
        author_id: row.try_get("author_id")?,
        author_username: row.try_get("author_username")?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
