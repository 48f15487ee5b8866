//! Author repository

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Author, AuthorWithCount, ListParams, PagedResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

const SELECT_BY_ID: &str = "SELECT id, name, created_at FROM authors WHERE id = ?";

const SELECT_BY_NAME: &str =
    "SELECT id, name, created_at FROM authors WHERE LOWER(name) = LOWER(?) ORDER BY id LIMIT 1";

const SELECT_PAGE: &str = r#"
    SELECT a.id, a.name, a.created_at, COUNT(b.id) AS book_count
    FROM authors a
    LEFT JOIN books b ON b.author_id = a.id
    GROUP BY a.id, a.name, a.created_at
    ORDER BY a.name ASC, a.id ASC
    LIMIT ? OFFSET ?
"#;

const COUNT_ALL: &str = "SELECT COUNT(*) FROM authors";

/// Author repository trait
#[async_trait]
pub trait AuthorRepository: Send + Sync {
    async fn create(&self, name: &str) -> Result<Author>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Author>>;

    /// Find an author by name, case-insensitively
    async fn find_by_name(&self, name: &str) -> Result<Option<Author>>;

    /// Rename an author; `None` when the author does not exist
    async fn update(&self, id: i64, name: &str) -> Result<Option<Author>>;

    /// Delete an author and, through the cascade, their books
    async fn delete(&self, id: i64) -> Result<bool>;

    /// Authors ordered by name, with their book counts
    async fn list(&self, params: &ListParams) -> Result<PagedResult<AuthorWithCount>>;
}

/// SQLx-based author repository implementation
pub struct SqlxAuthorRepository {
    pool: DynDatabasePool,
}

impl SqlxAuthorRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn AuthorRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl AuthorRepository for SqlxAuthorRepository {
    async fn create(&self, name: &str) -> Result<Author> {
        let now = Utc::now();
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query("INSERT INTO authors (name, created_at) VALUES (?, ?)")
                .bind(name)
                .bind(now)
                .execute(self.pool.sqlite_pool()?)
                .await
                .context("Failed to create author")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query("INSERT INTO authors (name, created_at) VALUES (?, ?)")
                .bind(name)
                .bind(now)
                .execute(self.pool.mysql_pool()?)
                .await
                .context("Failed to create author")?
                .last_insert_id() as i64,
        };

        Ok(Author {
            id,
            name: name.to_string(),
            created_at: now,
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Author>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(SELECT_BY_ID)
                    .bind(id)
                    .fetch_optional(self.pool.sqlite_pool()?)
                    .await
                    .context("Failed to get author by ID")?;
                row.as_ref().map(row_to_author_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(SELECT_BY_ID)
                    .bind(id)
                    .fetch_optional(self.pool.mysql_pool()?)
                    .await
                    .context("Failed to get author by ID")?;
                row.as_ref().map(row_to_author_mysql).transpose()
            }
        }
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Author>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(SELECT_BY_NAME)
                    .bind(name)
                    .fetch_optional(self.pool.sqlite_pool()?)
                    .await
                    .context("Failed to find author by name")?;
                row.as_ref().map(row_to_author_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(SELECT_BY_NAME)
                    .bind(name)
                    .fetch_optional(self.pool.mysql_pool()?)
                    .await
                    .context("Failed to find author by name")?;
                row.as_ref().map(row_to_author_mysql).transpose()
            }
        }
    }

    async fn update(&self, id: i64, name: &str) -> Result<Option<Author>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query("UPDATE authors SET name = ? WHERE id = ?")
                .bind(name)
                .bind(id)
                .execute(self.pool.sqlite_pool()?)
                .await
                .map(|_| ()),
            DatabaseDriver::Mysql => sqlx::query("UPDATE authors SET name = ? WHERE id = ?")
                .bind(name)
                .bind(id)
                .execute(self.pool.mysql_pool()?)
                .await
                .map(|_| ()),
        }
        .context("Failed to update author")?;

        // MySQL reports zero affected rows for an unchanged value, so
        // existence is decided by reading the row back.
        self.get_by_id(id).await
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query("DELETE FROM authors WHERE id = ?")
                .bind(id)
                .execute(self.pool.sqlite_pool()?)
                .await
                .map(|r| r.rows_affected()),
            DatabaseDriver::Mysql => sqlx::query("DELETE FROM authors WHERE id = ?")
                .bind(id)
                .execute(self.pool.mysql_pool()?)
                .await
                .map(|r| r.rows_affected()),
        }
        .context("Failed to delete author")?;
        Ok(affected > 0)
    }

    async fn list(&self, params: &ListParams) -> Result<PagedResult<AuthorWithCount>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_authors_sqlite(self.pool.sqlite_pool()?, params).await,
            DatabaseDriver::Mysql => list_authors_mysql(self.pool.mysql_pool()?, params).await,
        }
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn list_authors_sqlite(
    pool: &SqlitePool,
    params: &ListParams,
) -> Result<PagedResult<AuthorWithCount>> {
    let rows = sqlx::query(SELECT_PAGE)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list authors")?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        items.push(AuthorWithCount {
            author: row_to_author_sqlite(row)?,
            book_count: row.try_get("book_count")?,
        });
    }

    let total: i64 = sqlx::query_scalar(COUNT_ALL)
        .fetch_one(pool)
        .await
        .context("Failed to count authors")?;

    Ok(PagedResult::new(items, total, params))
}

fn row_to_author_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Author> {
    Ok(Author {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn list_authors_mysql(
    pool: &MySqlPool,
    params: &ListParams,
) -> Result<PagedResult<AuthorWithCount>> {
    let rows = sqlx::query(SELECT_PAGE)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list authors")?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        items.push(AuthorWithCount {
            author: row_to_author_mysql(row)?,
            book_count: row.try_get("book_count")?,
        });
    }

    let total: i64 = sqlx::query_scalar(COUNT_ALL)
        .fetch_one(pool)
        .await
        .context("Failed to count authors")?;

    Ok(PagedResult::new(items, total, params))
}

fn row_to_author_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Author> {
    Ok(Author {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
    })
}
