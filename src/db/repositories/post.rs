//! Post repository
//!
//! Posts carry their tags and comment count. Tag rows are created on demand
//! while a post is saved, keyed by slug, in the same transaction as the post.

use super::like_pattern;
use super::tag::{row_to_tag, SELECT_FOR_POST};
use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{slugify, ListParams, PagedResult, Post, PostRecord, PostScope, Tag};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    Database, Encode, MySql, MySqlPool, QueryBuilder, Row, Sqlite, SqlitePool, Transaction, Type,
};
use std::sync::Arc;

const SELECT_POST: &str = r#"
    SELECT p.id, p.title, p.content, p.author_id, u.username AS author_username,
           p.published_date, p.updated_at,
           (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comment_count
    FROM posts p
    INNER JOIN users u ON u.id = p.author_id
"#;

const COUNT_POSTS: &str = "SELECT COUNT(*) FROM posts p";

const POST_EXISTS: &str = "SELECT COUNT(*) FROM posts WHERE id = ?";

const TAG_ID_BY_SLUG: &str = "SELECT id FROM tags WHERE slug = ?";

/// Post repository trait
#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Insert a post and attach its tags
    async fn create(&self, author_id: i64, record: &PostRecord) -> Result<Post>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Post>>;

    /// Replace title, content and the full tag set
    async fn update(&self, id: i64, record: &PostRecord) -> Result<Option<Post>>;

    async fn delete(&self, id: i64) -> Result<bool>;

    /// Newest first
    async fn list(&self, scope: &PostScope, params: &ListParams) -> Result<PagedResult<Post>>;
}

/// SQLx-based post repository implementation
pub struct SqlxPostRepository {
    pool: DynDatabasePool,
}

impl SqlxPostRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn PostRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl PostRepository for SqlxPostRepository {
    async fn create(&self, author_id: i64, record: &PostRecord) -> Result<Post> {
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                create_post_sqlite(self.pool.sqlite_pool()?, author_id, record).await?
            }
            DatabaseDriver::Mysql => {
                create_post_mysql(self.pool.mysql_pool()?, author_id, record).await?
            }
        };

        self.get_by_id(id)
            .await?
            .context("Post disappeared after insert")
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Post>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_post_sqlite(self.pool.sqlite_pool()?, id).await,
            DatabaseDriver::Mysql => get_post_mysql(self.pool.mysql_pool()?, id).await,
        }
    }

    async fn update(&self, id: i64, record: &PostRecord) -> Result<Option<Post>> {
        let found = match self.pool.driver() {
            DatabaseDriver::Sqlite => update_post_sqlite(self.pool.sqlite_pool()?, id, record).await?,
            DatabaseDriver::Mysql => update_post_mysql(self.pool.mysql_pool()?, id, record).await?,
        };

        if !found {
            return Ok(None);
        }
        self.get_by_id(id).await
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query("DELETE FROM posts WHERE id = ?")
                .bind(id)
                .execute(self.pool.sqlite_pool()?)
                .await
                .map(|r| r.rows_affected()),
            DatabaseDriver::Mysql => sqlx::query("DELETE FROM posts WHERE id = ?")
                .bind(id)
                .execute(self.pool.mysql_pool()?)
                .await
                .map(|r| r.rows_affected()),
        }
        .context("Failed to delete post")?;
        Ok(affected > 0)
    }

    async fn list(&self, scope: &PostScope, params: &ListParams) -> Result<PagedResult<Post>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_posts_sqlite(self.pool.sqlite_pool()?, scope, params).await,
            DatabaseDriver::Mysql => list_posts_mysql(self.pool.mysql_pool()?, scope, params).await,
        }
    }
}

fn push_scope<'a, DB>(qb: &mut QueryBuilder<'a, DB>, scope: &PostScope)
where
    DB: Database,
    i64: Encode<'a, DB> + Type<DB>,
    String: Encode<'a, DB> + Type<DB>,
{
    match scope {
        PostScope::All => {}
        PostScope::Search(term) => {
            let pattern = like_pattern(&term.raw);
            qb.push(" WHERE (LOWER(p.title) LIKE LOWER(")
                .push_bind(like_pattern(&term.escaped))
                .push(") ESCAPE '!' OR LOWER(p.content) LIKE LOWER(")
                .push_bind(pattern.clone())
                .push(
                    ") ESCAPE '!' OR EXISTS (SELECT 1 FROM post_tags spt \
                     INNER JOIN tags st ON st.id = spt.tag_id \
                     WHERE spt.post_id = p.id AND LOWER(st.name) LIKE LOWER(",
                )
                .push_bind(pattern)
                .push(") ESCAPE '!'))");
        }
        PostScope::Tag(slug) => {
            qb.push(
                " WHERE EXISTS (SELECT 1 FROM post_tags spt \
                 INNER JOIN tags st ON st.id = spt.tag_id \
                 WHERE spt.post_id = p.id AND st.slug = ",
            )
            .push_bind(slug.clone())
            .push(")");
        }
        PostScope::Author(author_id) => {
            qb.push(" WHERE p.author_id = ").push_bind(*author_id);
        }
    }
}

/// Tag names reduced to distinct, non-empty slugs; the first spelling wins
fn distinct_tags(names: &[String]) -> Vec<(String, String)> {
    let mut seen = Vec::with_capacity(names.len());
    for name in names {
        let slug = slugify(name);
        if slug.is_empty() || seen.iter().any(|(_, s): &(String, String)| *s == slug) {
            continue;
        }
        seen.push((name.trim().to_string(), slug));
    }
    seen
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn attach_tags_sqlite(
    tx: &mut Transaction<'_, Sqlite>,
    post_id: i64,
    names: &[String],
) -> Result<()> {
    for (name, slug) in distinct_tags(names) {
        sqlx::query("INSERT OR IGNORE INTO tags (name, slug) VALUES (?, ?)")
            .bind(&name)
            .bind(&slug)
            .execute(&mut **tx)
            .await
            .context("Failed to create tag")?;

        let tag_id: i64 = sqlx::query_scalar(TAG_ID_BY_SLUG)
            .bind(&slug)
            .fetch_one(&mut **tx)
            .await
            .context("Failed to resolve tag")?;

        sqlx::query("INSERT OR IGNORE INTO post_tags (post_id, tag_id) VALUES (?, ?)")
            .bind(post_id)
            .bind(tag_id)
            .execute(&mut **tx)
            .await
            .context("Failed to attach tag")?;
    }
    Ok(())
}

async fn create_post_sqlite(pool: &SqlitePool, author_id: i64, record: &PostRecord) -> Result<i64> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let id = sqlx::query(
        r#"
        INSERT INTO posts (title, content, author_id, published_date, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.title)
    .bind(&record.content)
    .bind(author_id)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to create post")?
    .last_insert_rowid();

    attach_tags_sqlite(&mut tx, id, &record.tags).await?;
    tx.commit().await.context("Failed to commit post")?;
    Ok(id)
}

async fn update_post_sqlite(pool: &SqlitePool, id: i64, record: &PostRecord) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let exists: i64 = sqlx::query_scalar(POST_EXISTS)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to check post")?;
    if exists == 0 {
        return Ok(false);
    }

    sqlx::query("UPDATE posts SET title = ?, content = ?, updated_at = ? WHERE id = ?")
        .bind(&record.title)
        .bind(&record.content)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to update post")?;

    sqlx::query("DELETE FROM post_tags WHERE post_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to clear post tags")?;

    attach_tags_sqlite(&mut tx, id, &record.tags).await?;
    tx.commit().await.context("Failed to commit post")?;
    Ok(true)
}

async fn get_post_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<Post>> {
    let mut qb = QueryBuilder::<Sqlite>::new(SELECT_POST);
    qb.push(" WHERE p.id = ").push_bind(id);

    let row = qb
        .build()
        .fetch_optional(pool)
        .await
        .context("Failed to get post by ID")?;

    match row {
        Some(row) => {
            let mut post = row_to_post_sqlite(&row)?;
            post.tags = tags_for_post_sqlite(pool, post.id).await?;
            Ok(Some(post))
        }
        None => Ok(None),
    }
}

async fn list_posts_sqlite(
    pool: &SqlitePool,
    scope: &PostScope,
    params: &ListParams,
) -> Result<PagedResult<Post>> {
    let mut qb = QueryBuilder::<Sqlite>::new(SELECT_POST);
    push_scope(&mut qb, scope);
    qb.push(" ORDER BY p.published_date DESC, p.id DESC");
    qb.push(" LIMIT ").push_bind(params.limit());
    qb.push(" OFFSET ").push_bind(params.offset());

    let rows = qb
        .build()
        .fetch_all(pool)
        .await
        .context("Failed to list posts")?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut post = row_to_post_sqlite(row)?;
        post.tags = tags_for_post_sqlite(pool, post.id).await?;
        items.push(post);
    }

    let mut count_qb = QueryBuilder::<Sqlite>::new(COUNT_POSTS);
    push_scope(&mut count_qb, scope);
    let total: i64 = count_qb
        .build_query_scalar()
        .fetch_one(pool)
        .await
        .context("Failed to count posts")?;

    Ok(PagedResult::new(items, total, params))
}

async fn tags_for_post_sqlite(pool: &SqlitePool, post_id: i64) -> Result<Vec<Tag>> {
    let rows = sqlx::query(SELECT_FOR_POST)
        .bind(post_id)
        .fetch_all(pool)
        .await
        .context("Failed to load post tags")?;
    rows.iter()
        .map(|row| -> Result<Tag> { Ok(row_to_tag!(row)) })
        .collect()
}

fn row_to_post_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Post> {
    Ok(Post {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        author_id: row.try_get("author_id")?,
        author_username: row.try_get("author_username")?,
        published_date: row.try_get("published_date")?,
        updated_at: row.try_get("updated_at")?,
        tags: Vec::new(),
        comment_count: row.try_get("comment_count")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn attach_tags_mysql(
    tx: &mut Transaction<'_, MySql>,
    post_id: i64,
    names: &[String],
) -> Result<()> {
    for (name, slug) in distinct_tags(names) {
        sqlx::query("INSERT IGNORE INTO tags (name, slug) VALUES (?, ?)")
            .bind(&name)
            .bind(&slug)
            .execute(&mut **tx)
            .await
            .context("Failed to create tag")?;

        let tag_id: i64 = sqlx::query_scalar(TAG_ID_BY_SLUG)
            .bind(&slug)
            .fetch_one(&mut **tx)
            .await
            .context("Failed to resolve tag")?;

        sqlx::query("INSERT IGNORE INTO post_tags (post_id, tag_id) VALUES (?, ?)")
            .bind(post_id)
            .bind(tag_id)
            .execute(&mut **tx)
            .await
            .context("Failed to attach tag")?;
    }
    Ok(())
}

async fn create_post_mysql(pool: &MySqlPool, author_id: i64, record: &PostRecord) -> Result<i64> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let id = sqlx::query(
        r#"
        INSERT INTO posts (title, content, author_id, published_date, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.title)
    .bind(&record.content)
    .bind(author_id)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to create post")?
    .last_insert_id() as i64;

    attach_tags_mysql(&mut tx, id, &record.tags).await?;
    tx.commit().await.context("Failed to commit post")?;
    Ok(id)
}

async fn update_post_mysql(pool: &MySqlPool, id: i64, record: &PostRecord) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let exists: i64 = sqlx::query_scalar(POST_EXISTS)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to check post")?;
    if exists == 0 {
        return Ok(false);
    }

    sqlx::query("UPDATE posts SET title = ?, content = ?, updated_at = ? WHERE id = ?")
        .bind(&record.title)
        .bind(&record.content)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to update post")?;

    sqlx::query("DELETE FROM post_tags WHERE post_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to clear post tags")?;

    attach_tags_mysql(&mut tx, id, &record.tags).await?;
    tx.commit().await.context("Failed to commit post")?;
    Ok(true)
}

async fn get_post_mysql(pool: &MySqlPool, id: i64) -> Result<Option<Post>> {
    let mut qb = QueryBuilder::<MySql>::new(SELECT_POST);
    qb.push(" WHERE p.id = ").push_bind(id);

    let row = qb
        .build()
        .fetch_optional(pool)
        .await
        .context("Failed to get post by ID")?;

    match row {
        Some(row) => {
            let mut post = row_to_post_mysql(&row)?;
            post.tags = tags_for_post_mysql(pool, post.id).await?;
            Ok(Some(post))
        }
        None => Ok(None),
    }
}

async fn list_posts_mysql(
    pool: &MySqlPool,
    scope: &PostScope,
    params: &ListParams,
) -> Result<PagedResult<Post>> {
    let mut qb = QueryBuilder::<MySql>::new(SELECT_POST);
    push_scope(&mut qb, scope);
    qb.push(" ORDER BY p.published_date DESC, p.id DESC");
    qb.push(" LIMIT ").push_bind(params.limit());
    qb.push(" OFFSET ").push_bind(params.offset());

    let rows = qb
        .build()
        .fetch_all(pool)
        .await
        .context("Failed to list posts")?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut post = row_to_post_mysql(row)?;
        post.tags = tags_for_post_mysql(pool, post.id).await?;
        items.push(post);
    }

    let mut count_qb = QueryBuilder::<MySql>::new(COUNT_POSTS);
    push_scope(&mut count_qb, scope);
    let total: i64 = count_qb
        .build_query_scalar()
        .fetch_one(pool)
        .await
        .context("Failed to count posts")?;

    Ok(PagedResult::new(items, total, params))
}

async fn tags_for_post_mysql(pool: &MySqlPool, post_id: i64) -> Result<Vec<Tag>> {
    let rows = sqlx::query(SELECT_FOR_POST)
        .bind(post_id)
        .fetch_all(pool)
        .await
        .context("Failed to load post tags")?;
    rows.iter()
        .map(|row| -> Result<Tag> { Ok(row_to_tag!(row)) })
        .collect()
}

fn row_to_post_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Post> {
    Ok(Post {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        author_id: row.try_get("author_id")?,
        author_username: row.try_get("author_username")?,
        published_date: row.try_get("published_date")?,
        updated_at: row.try_get("updated_at")?,
        tags: Vec::new(),
        comment_count: row.try_get("comment_count")?,
    })
}
