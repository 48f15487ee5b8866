//! Book repository
//!
//! Reads always join the owning author so a `Book` carries `author_name`.
//! List filters are assembled with `QueryBuilder`; every user-supplied value
//! is bound, and LIKE patterns go through `like_pattern`.

use super::like_pattern;
use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Book, BookAuthor, BookFilter, BookRecord, ListParams, PagedResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    Database, Encode, MySql, MySqlPool, QueryBuilder, Row, Sqlite, SqlitePool, Transaction, Type,
};
use std::sync::Arc;

const SELECT_BOOK: &str = r#"
    SELECT b.id, b.title, b.author_id, a.name AS author_name, b.publication_year, b.isbn,
           b.created_at, b.updated_at
    FROM books b
    INNER JOIN authors a ON a.id = b.author_id
"#;

const COUNT_BOOKS: &str = "SELECT COUNT(*) FROM books b INNER JOIN authors a ON a.id = b.author_id";

const INSERT_AUTHOR: &str = "INSERT INTO authors (name, created_at) VALUES (?, ?)";

// Row ids start at 1, so 0 excludes nothing.
const NO_EXCLUDE: i64 = 0;

const ISBN_TAKEN: &str = "SELECT COUNT(*) FROM books WHERE isbn = ? AND id <> ?";

const DUPLICATE_EXISTS: &str = r#"
    SELECT COUNT(*)
    FROM books b
    INNER JOIN authors a ON a.id = b.author_id
    WHERE LOWER(b.title) = LOWER(?) AND LOWER(a.name) = LOWER(?) AND b.id <> ?
"#;

/// Book repository trait
///
/// Writes that name a new author insert it in the same transaction as the
/// book, so a failed book write leaves no author behind.
#[async_trait]
pub trait BookRepository: Send + Sync {
    async fn create(&self, record: &BookRecord) -> Result<Book>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Book>>;

    /// Overwrite every field; `None` when the book does not exist
    async fn update(&self, id: i64, record: &BookRecord) -> Result<Option<Book>>;

    async fn delete(&self, id: i64) -> Result<bool>;

    /// Filtered, ordered page of books
    async fn list(&self, filter: &BookFilter, params: &ListParams) -> Result<PagedResult<Book>>;

    /// All books of one author, by title
    async fn list_by_author(&self, author_id: i64) -> Result<Vec<Book>>;

    /// All books shelved in one library, by title
    async fn list_by_library(&self, library_id: i64) -> Result<Vec<Book>>;

    /// Whether another book already uses `isbn`
    async fn isbn_taken(&self, isbn: &str, exclude_id: Option<i64>) -> Result<bool>;

    /// Whether another book has the same title and author name, ignoring case
    async fn duplicate_exists(
        &self,
        title: &str,
        author_name: &str,
        exclude_id: Option<i64>,
    ) -> Result<bool>;
}

/// SQLx-based book repository implementation
pub struct SqlxBookRepository {
    pool: DynDatabasePool,
}

impl SqlxBookRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn BookRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl BookRepository for SqlxBookRepository {
    async fn create(&self, record: &BookRecord) -> Result<Book> {
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => create_book_sqlite(self.pool.sqlite_pool()?, record).await?,
            DatabaseDriver::Mysql => create_book_mysql(self.pool.mysql_pool()?, record).await?,
        };

        self.get_by_id(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Book not found after insert"))
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Book>> {
        let sql = format!("{} WHERE b.id = ?", SELECT_BOOK);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(self.pool.sqlite_pool()?)
                    .await
                    .context("Failed to get book by ID")?;
                row.as_ref().map(row_to_book_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(self.pool.mysql_pool()?)
                    .await
                    .context("Failed to get book by ID")?;
                row.as_ref().map(row_to_book_mysql).transpose()
            }
        }
    }

    async fn update(&self, id: i64, record: &BookRecord) -> Result<Option<Book>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_book_sqlite(self.pool.sqlite_pool()?, id, record).await?,
            DatabaseDriver::Mysql => update_book_mysql(self.pool.mysql_pool()?, id, record).await?,
        }
        self.get_by_id(id).await
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query("DELETE FROM books WHERE id = ?")
                .bind(id)
                .execute(self.pool.sqlite_pool()?)
                .await
                .map(|r| r.rows_affected()),
            DatabaseDriver::Mysql => sqlx::query("DELETE FROM books WHERE id = ?")
                .bind(id)
                .execute(self.pool.mysql_pool()?)
                .await
                .map(|r| r.rows_affected()),
        }
        .context("Failed to delete book")?;
        Ok(affected > 0)
    }

    async fn list(&self, filter: &BookFilter, params: &ListParams) -> Result<PagedResult<Book>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_books_sqlite(self.pool.sqlite_pool()?, filter, params).await,
            DatabaseDriver::Mysql => list_books_mysql(self.pool.mysql_pool()?, filter, params).await,
        }
    }

    async fn list_by_author(&self, author_id: i64) -> Result<Vec<Book>> {
        let sql = format!("{} WHERE b.author_id = ? ORDER BY b.title ASC, b.id ASC", SELECT_BOOK);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sqlx::query(&sql)
                    .bind(author_id)
                    .fetch_all(self.pool.sqlite_pool()?)
                    .await
                    .context("Failed to list books by author")?;
                rows.iter().map(row_to_book_sqlite).collect()
            }
            DatabaseDriver::Mysql => {
                let rows = sqlx::query(&sql)
                    .bind(author_id)
                    .fetch_all(self.pool.mysql_pool()?)
                    .await
                    .context("Failed to list books by author")?;
                rows.iter().map(row_to_book_mysql).collect()
            }
        }
    }

    async fn list_by_library(&self, library_id: i64) -> Result<Vec<Book>> {
        let sql = format!(
            "{} INNER JOIN library_books lb ON lb.book_id = b.id \
             WHERE lb.library_id = ? ORDER BY b.title ASC, b.id ASC",
            SELECT_BOOK
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sqlx::query(&sql)
                    .bind(library_id)
                    .fetch_all(self.pool.sqlite_pool()?)
                    .await
                    .context("Failed to list library books")?;
                rows.iter().map(row_to_book_sqlite).collect()
            }
            DatabaseDriver::Mysql => {
                let rows = sqlx::query(&sql)
                    .bind(library_id)
                    .fetch_all(self.pool.mysql_pool()?)
                    .await
                    .context("Failed to list library books")?;
                rows.iter().map(row_to_book_mysql).collect()
            }
        }
    }

    async fn isbn_taken(&self, isbn: &str, exclude_id: Option<i64>) -> Result<bool> {
        let exclude = exclude_id.unwrap_or(NO_EXCLUDE);
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(ISBN_TAKEN)
                .bind(isbn)
                .bind(exclude)
                .fetch_one(self.pool.sqlite_pool()?)
                .await,
            DatabaseDriver::Mysql => sqlx::query_scalar(ISBN_TAKEN)
                .bind(isbn)
                .bind(exclude)
                .fetch_one(self.pool.mysql_pool()?)
                .await,
        }
        .context("Failed to check ISBN uniqueness")?;
        Ok(count > 0)
    }

    async fn duplicate_exists(
        &self,
        title: &str,
        author_name: &str,
        exclude_id: Option<i64>,
    ) -> Result<bool> {
        let exclude = exclude_id.unwrap_or(NO_EXCLUDE);
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(DUPLICATE_EXISTS)
                .bind(title)
                .bind(author_name)
                .bind(exclude)
                .fetch_one(self.pool.sqlite_pool()?)
                .await,
            DatabaseDriver::Mysql => sqlx::query_scalar(DUPLICATE_EXISTS)
                .bind(title)
                .bind(author_name)
                .bind(exclude)
                .fetch_one(self.pool.mysql_pool()?)
                .await,
        }
        .context("Failed to check for duplicate book")?;
        Ok(count > 0)
    }
}

/// Append the WHERE clause for `filter` to a query over `books b` joined with
/// `authors a`.
fn push_filters<'a, DB>(qb: &mut QueryBuilder<'a, DB>, filter: &BookFilter)
where
    DB: Database,
    i64: Encode<'a, DB> + Type<DB>,
    i32: Encode<'a, DB> + Type<DB>,
    String: Encode<'a, DB> + Type<DB>,
{
    qb.push(" WHERE 1 = 1");

    if let Some(title) = &filter.title {
        qb.push(" AND LOWER(b.title) LIKE LOWER(")
            .push_bind(like_pattern(title))
            .push(") ESCAPE '!'");
    }
    if let Some(author_id) = filter.author_id {
        qb.push(" AND b.author_id = ").push_bind(author_id);
    }
    if let Some(year) = filter.publication_year {
        qb.push(" AND b.publication_year = ").push_bind(year);
    }
    if let Some(search) = &filter.search {
        let pattern = like_pattern(search);
        qb.push(" AND (LOWER(b.title) LIKE LOWER(")
            .push_bind(pattern.clone())
            .push(") ESCAPE '!' OR LOWER(a.name) LIKE LOWER(")
            .push_bind(pattern)
            .push(") ESCAPE '!')");
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn author_id_sqlite(tx: &mut Transaction<'_, Sqlite>, author: &BookAuthor) -> Result<i64> {
    match author {
        BookAuthor::Existing(id) => Ok(*id),
        BookAuthor::New(name) => Ok(sqlx::query(INSERT_AUTHOR)
            .bind(name)
            .bind(Utc::now())
            .execute(&mut **tx)
            .await
            .context("Failed to create author")?
            .last_insert_rowid()),
    }
}

async fn create_book_sqlite(pool: &SqlitePool, record: &BookRecord) -> Result<i64> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    let author_id = author_id_sqlite(&mut tx, &record.author).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO books (title, author_id, publication_year, isbn, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.title)
    .bind(author_id)
    .bind(record.publication_year)
    .bind(&record.isbn)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to create book")?;

    tx.commit().await.context("Failed to commit book creation")?;
    Ok(result.last_insert_rowid())
}

async fn update_book_sqlite(pool: &SqlitePool, id: i64, record: &BookRecord) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    let author_id = author_id_sqlite(&mut tx, &record.author).await?;

    sqlx::query(
        r#"
        UPDATE books
        SET title = ?, author_id = ?, publication_year = ?, isbn = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&record.title)
    .bind(author_id)
    .bind(record.publication_year)
    .bind(&record.isbn)
    .bind(Utc::now())
    .bind(id)
    .execute(&mut *tx)
    .await
    .context("Failed to update book")?;

    tx.commit().await.context("Failed to commit book update")?;
    Ok(())
}

async fn list_books_sqlite(
    pool: &SqlitePool,
    filter: &BookFilter,
    params: &ListParams,
) -> Result<PagedResult<Book>> {
    let mut qb = QueryBuilder::<Sqlite>::new(SELECT_BOOK);
    push_filters(&mut qb, filter);
    qb.push(" ORDER BY ").push(filter.ordering.sql());
    qb.push(" LIMIT ").push_bind(params.limit());
    qb.push(" OFFSET ").push_bind(params.offset());

    let rows = qb
        .build()
        .fetch_all(pool)
        .await
        .context("Failed to list books")?;
    let items = rows.iter().map(row_to_book_sqlite).collect::<Result<Vec<_>>>()?;

    let mut count_qb = QueryBuilder::<Sqlite>::new(COUNT_BOOKS);
    push_filters(&mut count_qb, filter);
    let total: i64 = count_qb
        .build_query_scalar()
        .fetch_one(pool)
        .await
        .context("Failed to count books")?;

    Ok(PagedResult::new(items, total, params))
}

fn row_to_book_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Book> {
    Ok(Book {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        author_id: row.try_get("author_id")?,
        author_name: row.try_get("author_name")?,
        publication_year: row.try_get("publication_year")?,
        isbn: row.try_get("isbn")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn author_id_mysql(tx: &mut Transaction<'_, MySql>, author: &BookAuthor) -> Result<i64> {
    match author {
        BookAuthor::Existing(id) => Ok(*id),
        BookAuthor::New(name) => Ok(sqlx::query(INSERT_AUTHOR)
            .bind(name)
            .bind(Utc::now())
            .execute(&mut **tx)
            .await
            .context("Failed to create author")?
            .last_insert_id() as i64),
    }
}

async fn create_book_mysql(pool: &MySqlPool, record: &BookRecord) -> Result<i64> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    let author_id = author_id_mysql(&mut tx, &record.author).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO books (title, author_id, publication_year, isbn, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.title)
    .bind(author_id)
    .bind(record.publication_year)
    .bind(&record.isbn)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to create book")?;

    tx.commit().await.context("Failed to commit book creation")?;
    Ok(result.last_insert_id() as i64)
}

async fn update_book_mysql(pool: &MySqlPool, id: i64, record: &BookRecord) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    let author_id = author_id_mysql(&mut tx, &record.author).await?;

    sqlx::query(
        r#"
        UPDATE books
        SET title = ?, author_id = ?, publication_year = ?, isbn = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&record.title)
    .bind(author_id)
    .bind(record.publication_year)
    .bind(&record.isbn)
    .bind(Utc::now())
    .bind(id)
    .execute(&mut *tx)
    .await
    .context("Failed to update book")?;

    tx.commit().await.context("Failed to commit book update")?;
    Ok(())
}

async fn list_books_mysql(
    pool: &MySqlPool,
    filter: &BookFilter,
    params: &ListParams,
) -> Result<PagedResult<Book>> {
    let mut qb = QueryBuilder::<MySql>::new(SELECT_BOOK);
    push_filters(&mut qb, filter);
    qb.push(" ORDER BY ").push(filter.ordering.sql());
    qb.push(" LIMIT ").push_bind(params.limit());
    qb.push(" OFFSET ").push_bind(params.offset());

    let rows = qb
        .build()
        .fetch_all(pool)
        .await
        .context("Failed to list books")?;
    let items = rows.iter().map(row_to_book_mysql).collect::<Result<Vec<_>>>()?;

    let mut count_qb = QueryBuilder::<MySql>::new(COUNT_BOOKS);
    push_filters(&mut count_qb, filter);
    let total: i64 = count_qb
        .build_query_scalar()
        .fetch_one(pool)
        .await
        .context("Failed to count books")?;

    Ok(PagedResult::new(items, total, params))
}

fn row_to_book_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Book> {
    Ok(Book {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        author_id: row.try_get("author_id")?,
        author_name: row.try_get("author_name")?,
        publication_year: row.try_get("publication_year")?,
        isbn: row.try_get("isbn")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
