//! Library repository
//!
//! Libraries, the books shelved in them and their librarian. Book rows of a
//! library are read through [`super::BookRepository::list_by_library`].

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Librarian, Library, LibraryWithCount, ListParams, PagedResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

const SELECT_BY_ID: &str = "SELECT id, name, created_at FROM libraries WHERE id = ?";

const SELECT_BY_NAME: &str =
    "SELECT id, name, created_at FROM libraries WHERE LOWER(name) = LOWER(?) ORDER BY id LIMIT 1";

const SELECT_PAGE: &str = r#"
    SELECT l.id, l.name, l.created_at, COUNT(lb.book_id) AS book_count
    FROM libraries l
    LEFT JOIN library_books lb ON lb.library_id = l.id
    GROUP BY l.id, l.name, l.created_at
    ORDER BY l.name ASC, l.id ASC
    LIMIT ? OFFSET ?
"#;

const COUNT_ALL: &str = "SELECT COUNT(*) FROM libraries";

const SELECT_LIBRARIAN: &str =
    "SELECT id, name, library_id, created_at FROM librarians WHERE library_id = ?";

const UPSERT_LIBRARIAN_SQLITE: &str = r#"
    INSERT INTO librarians (name, library_id, created_at) VALUES (?, ?, ?)
    ON CONFLICT(library_id) DO UPDATE SET name = excluded.name
"#;

const UPSERT_LIBRARIAN_MYSQL: &str = r#"
    INSERT INTO librarians (name, library_id, created_at) VALUES (?, ?, ?)
    ON DUPLICATE KEY UPDATE name = VALUES(name)
"#;

/// Library repository trait
#[async_trait]
pub trait LibraryRepository: Send + Sync {
    async fn create(&self, name: &str) -> Result<Library>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Library>>;

    /// Find a library by name, case-insensitively
    async fn find_by_name(&self, name: &str) -> Result<Option<Library>>;

    /// Delete a library; its shelf entries and librarian go with it
    async fn delete(&self, id: i64) -> Result<bool>;

    /// Libraries ordered by name, with their book counts
    async fn list(&self, params: &ListParams) -> Result<PagedResult<LibraryWithCount>>;

    /// Shelve a book; `false` when it was already shelved
    async fn add_book(&self, library_id: i64, book_id: i64) -> Result<bool>;

    /// Take a book off the shelf; `false` when it was not shelved
    async fn remove_book(&self, library_id: i64, book_id: i64) -> Result<bool>;

    async fn librarian(&self, library_id: i64) -> Result<Option<Librarian>>;

    /// Appoint the librarian of a library, renaming the current one if any
    async fn set_librarian(&self, library_id: i64, name: &str) -> Result<Librarian>;

    async fn remove_librarian(&self, library_id: i64) -> Result<bool>;
}

/// SQLx-based library repository implementation
pub struct SqlxLibraryRepository {
    pool: DynDatabasePool,
}

impl SqlxLibraryRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn LibraryRepository> {
        Arc::new(Self::new(pool))
    }

    async fn execute(&self, sql: &str, first: i64, second: Option<i64>) -> Result<u64> {
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut query = sqlx::query(sql).bind(first);
                if let Some(second) = second {
                    query = query.bind(second);
                }
                query.execute(self.pool.sqlite_pool()?).await?.rows_affected()
            }
            DatabaseDriver::Mysql => {
                let mut query = sqlx::query(sql).bind(first);
                if let Some(second) = second {
                    query = query.bind(second);
                }
                query.execute(self.pool.mysql_pool()?).await?.rows_affected()
            }
        };
        Ok(affected)
    }
}

#[async_trait]
impl LibraryRepository for SqlxLibraryRepository {
    async fn create(&self, name: &str) -> Result<Library> {
        let now = Utc::now();
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query("INSERT INTO libraries (name, created_at) VALUES (?, ?)")
                .bind(name)
                .bind(now)
                .execute(self.pool.sqlite_pool()?)
                .await
                .context("Failed to create library")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query("INSERT INTO libraries (name, created_at) VALUES (?, ?)")
                .bind(name)
                .bind(now)
                .execute(self.pool.mysql_pool()?)
                .await
                .context("Failed to create library")?
                .last_insert_id() as i64,
        };

        Ok(Library {
            id,
            name: name.to_string(),
            created_at: now,
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Library>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(SELECT_BY_ID)
                    .bind(id)
                    .fetch_optional(self.pool.sqlite_pool()?)
                    .await
                    .context("Failed to get library by ID")?;
                row.as_ref().map(row_to_library_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(SELECT_BY_ID)
                    .bind(id)
                    .fetch_optional(self.pool.mysql_pool()?)
                    .await
                    .context("Failed to get library by ID")?;
                row.as_ref().map(row_to_library_mysql).transpose()
            }
        }
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Library>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(SELECT_BY_NAME)
                    .bind(name)
                    .fetch_optional(self.pool.sqlite_pool()?)
                    .await
                    .context("Failed to find library by name")?;
                row.as_ref().map(row_to_library_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(SELECT_BY_NAME)
                    .bind(name)
                    .fetch_optional(self.pool.mysql_pool()?)
                    .await
                    .context("Failed to find library by name")?;
                row.as_ref().map(row_to_library_mysql).transpose()
            }
        }
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let affected = self
            .execute("DELETE FROM libraries WHERE id = ?", id, None)
            .await
            .context("Failed to delete library")?;
        Ok(affected > 0)
    }

    async fn list(&self, params: &ListParams) -> Result<PagedResult<LibraryWithCount>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_libraries_sqlite(self.pool.sqlite_pool()?, params).await,
            DatabaseDriver::Mysql => list_libraries_mysql(self.pool.mysql_pool()?, params).await,
        }
    }

    async fn add_book(&self, library_id: i64, book_id: i64) -> Result<bool> {
        let sql = match self.pool.driver() {
            DatabaseDriver::Sqlite => "INSERT OR IGNORE INTO library_books (library_id, book_id) VALUES (?, ?)",
            DatabaseDriver::Mysql => "INSERT IGNORE INTO library_books (library_id, book_id) VALUES (?, ?)",
        };
        let affected = self
            .execute(sql, library_id, Some(book_id))
            .await
            .context("Failed to shelve book")?;
        Ok(affected > 0)
    }

    async fn remove_book(&self, library_id: i64, book_id: i64) -> Result<bool> {
        let affected = self
            .execute(
                "DELETE FROM library_books WHERE library_id = ? AND book_id = ?",
                library_id,
                Some(book_id),
            )
            .await
            .context("Failed to unshelve book")?;
        Ok(affected > 0)
    }

    async fn librarian(&self, library_id: i64) -> Result<Option<Librarian>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(SELECT_LIBRARIAN)
                    .bind(library_id)
                    .fetch_optional(self.pool.sqlite_pool()?)
                    .await
                    .context("Failed to get librarian")?;
                row.as_ref().map(row_to_librarian_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(SELECT_LIBRARIAN)
                    .bind(library_id)
                    .fetch_optional(self.pool.mysql_pool()?)
                    .await
                    .context("Failed to get librarian")?;
                row.as_ref().map(row_to_librarian_mysql).transpose()
            }
        }
    }

    async fn set_librarian(&self, library_id: i64, name: &str) -> Result<Librarian> {
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(UPSERT_LIBRARIAN_SQLITE)
                .bind(name)
                .bind(library_id)
                .bind(now)
                .execute(self.pool.sqlite_pool()?)
                .await
                .map(|_| ()),
            DatabaseDriver::Mysql => sqlx::query(UPSERT_LIBRARIAN_MYSQL)
                .bind(name)
                .bind(library_id)
                .bind(now)
                .execute(self.pool.mysql_pool()?)
                .await
                .map(|_| ()),
        }
        .context("Failed to set librarian")?;

        self.librarian(library_id)
            .await?
            .context("Librarian missing after upsert")
    }

    async fn remove_librarian(&self, library_id: i64) -> Result<bool> {
        let affected = self
            .execute("DELETE FROM librarians WHERE library_id = ?", library_id, None)
            .await
            .context("Failed to remove librarian")?;
        Ok(affected > 0)
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn list_libraries_sqlite(
    pool: &SqlitePool,
    params: &ListParams,
) -> Result<PagedResult<LibraryWithCount>> {
    let rows = sqlx::query(SELECT_PAGE)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list libraries")?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        items.push(LibraryWithCount {
            library: row_to_library_sqlite(row)?,
            book_count: row.try_get("book_count")?,
        });
    }

    let total: i64 = sqlx::query_scalar(COUNT_ALL)
        .fetch_one(pool)
        .await
        .context("Failed to count libraries")?;

    Ok(PagedResult::new(items, total, params))
}

fn row_to_library_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Library> {
    Ok(Library {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_librarian_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Librarian> {
    Ok(Librarian {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        library_id: row.try_get("library_id")?,
        created_at: row.try_get("created_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn list_libraries_mysql(
    pool: &MySqlPool,
    params: &ListParams,
) -> Result<PagedResult<LibraryWithCount>> {
    let rows = sqlx::query(SELECT_PAGE)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list libraries")?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        items.push(LibraryWithCount {
            library: row_to_library_mysql(row)?,
            book_count: row.try_get("book_count")?,
        });
    }

    let total: i64 = sqlx::query_scalar(COUNT_ALL)
        .fetch_one(pool)
        .await
        .context("Failed to count libraries")?;

    Ok(PagedResult::new(items, total, params))
}

fn row_to_library_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Library> {
    Ok(Library {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_librarian_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Librarian> {
    Ok(Librarian {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        library_id: row.try_get("library_id")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{BookRepository, SqlxBookRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::{BookAuthor, BookRecord};

    struct Fixture {
        libraries: SqlxLibraryRepository,
        books: Arc<dyn BookRepository>,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        Fixture {
            libraries: SqlxLibraryRepository::new(pool.clone()),
            books: SqlxBookRepository::boxed(pool),
        }
    }

    async fn book(f: &Fixture, title: &str) -> i64 {
        let record = BookRecord {
            title: title.to_string(),
            author: BookAuthor::New(format!("Author of {}", title)),
            publication_year: 1950,
            isbn: None,
        };
        f.books.create(&record).await.unwrap().id
    }

    #[tokio::test]
    async fn test_create_and_find_library() {
        let f = setup().await;
        let created = f.libraries.create("Central Library").await.unwrap();

        let found = f.libraries.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(found.name, "Central Library");
        let by_name = f.libraries.find_by_name("central library").await.unwrap().unwrap();
        assert_eq!(by_name.id, created.id);
        assert!(f.libraries.find_by_name("Central").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shelving_books() {
        let f = setup().await;
        let library = f.libraries.create("Central Library").await.unwrap();
        let dune = book(&f, "Dune").await;
        let emma = book(&f, "Emma").await;

        assert!(f.libraries.add_book(library.id, emma).await.unwrap());
        assert!(f.libraries.add_book(library.id, dune).await.unwrap());
        assert!(!f.libraries.add_book(library.id, dune).await.unwrap());

        let titles: Vec<_> = f
            .books
            .list_by_library(library.id)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.title)
            .collect();
        assert_eq!(titles, vec!["Dune", "Emma"]);

        assert!(f.libraries.remove_book(library.id, dune).await.unwrap());
        assert!(!f.libraries.remove_book(library.id, dune).await.unwrap());
        assert_eq!(f.books.list_by_library(library.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_libraries_with_book_counts() {
        let f = setup().await;
        let west = f.libraries.create("West Branch").await.unwrap();
        f.libraries.create("East Branch").await.unwrap();
        let dune = book(&f, "Dune").await;
        f.libraries.add_book(west.id, dune).await.unwrap();

        let page = f.libraries.list(&ListParams::new(1, 10)).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].library.name, "East Branch");
        assert_eq!(page.items[0].book_count, 0);
        assert_eq!(page.items[1].book_count, 1);
    }

    #[tokio::test]
    async fn test_set_librarian_replaces_name() {
        let f = setup().await;
        let library = f.libraries.create("Central Library").await.unwrap();
        assert!(f.libraries.librarian(library.id).await.unwrap().is_none());

        let first = f.libraries.set_librarian(library.id, "Ada").await.unwrap();
        let second = f.libraries.set_librarian(library.id, "Grace").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Grace");
        assert_eq!(second.library_id, library.id);

        assert!(f.libraries.remove_librarian(library.id).await.unwrap());
        assert!(f.libraries.librarian(library.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_library_keeps_books() {
        let f = setup().await;
        let library = f.libraries.create("Central Library").await.unwrap();
        let dune = book(&f, "Dune").await;
        f.libraries.add_book(library.id, dune).await.unwrap();
        f.libraries.set_librarian(library.id, "Ada").await.unwrap();

        assert!(f.libraries.delete(library.id).await.unwrap());
        assert!(!f.libraries.delete(library.id).await.unwrap());
        assert!(f.libraries.librarian(library.id).await.unwrap().is_none());
        assert!(f.books.get_by_id(dune).await.unwrap().is_some());
    }
}
