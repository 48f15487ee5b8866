//! Book service
//!
//! Books are validated field by field, then checked for ISBN uniqueness and
//! for an existing book with the same title by the same author. The author
//! may be given by id or by name; a name that matches no author creates one.

use crate::cache::{Cache, CacheLayer};
use crate::db::repositories::{is_unique_violation, AuthorRepository, BookRepository};
use crate::models::{
    Book, BookAuthor, BookFilter, BookOrdering, BookRecord, ListParams, PagedResult,
};
use crate::services::validation::{
    clean_author_name, clean_isbn, clean_publication_year, clean_search, clean_title,
    FieldErrors, NON_FIELD_ERRORS,
};
use anyhow::Context;
use serde::Deserialize;
use std::sync::Arc;

const ISBN_TAKEN: &str = "A book with this ISBN already exists.";

#[derive(Debug, thiserror::Error)]
pub enum BookServiceError {
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Book not found")]
    NotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Submitted book fields. Absent fields are required on create and on full
/// updates, and keep their stored value on partial updates.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookInput {
    pub title: Option<String>,
    /// Existing author by id
    #[serde(alias = "author")]
    pub author_id: Option<i64>,
    /// Author by name, created when missing
    pub author_name: Option<String>,
    /// Integer or numeric string
    pub publication_year: Option<serde_json::Value>,
    /// Blank clears the ISBN
    pub isbn: Option<String>,
}

/// Query string of the book list
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookListQuery {
    pub title: Option<String>,
    pub author: Option<i64>,
    pub publication_year: Option<i32>,
    pub search: Option<String>,
    pub ordering: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone)]
enum AuthorRef {
    Existing { id: i64, name: String },
    New(String),
}

impl AuthorRef {
    fn name(&self) -> &str {
        match self {
            AuthorRef::Existing { name, .. } | AuthorRef::New(name) => name,
        }
    }
}

#[derive(Debug, Clone)]
struct BookDraft {
    title: String,
    author: AuthorRef,
    publication_year: i32,
    isbn: Option<String>,
}

fn book_key(id: i64) -> String {
    format!("book:{}", id)
}

pub struct BookService {
    book_repo: Arc<dyn BookRepository>,
    author_repo: Arc<dyn AuthorRepository>,
    cache: Arc<Cache>,
    max_years_ahead: i32,
}

impl BookService {
    pub fn new(
        book_repo: Arc<dyn BookRepository>,
        author_repo: Arc<dyn AuthorRepository>,
        cache: Arc<Cache>,
        max_years_ahead: i32,
    ) -> Self {
        Self {
            book_repo,
            author_repo,
            cache,
            max_years_ahead,
        }
    }

    pub async fn list(&self, query: &BookListQuery) -> Result<PagedResult<Book>, BookServiceError> {
        let mut errors = FieldErrors::new();
        let title = errors.check("title", clean_search(query.title.as_deref()));
        let search = errors.check("search", clean_search(query.search.as_deref()));
        errors.into_result().map_err(BookServiceError::Validation)?;

        let filter = BookFilter {
            title: title.flatten(),
            author_id: query.author,
            publication_year: query.publication_year,
            search: search.flatten(),
            // Unknown ordering names fall back to the default
            ordering: query
                .ordering
                .as_deref()
                .and_then(BookOrdering::from_param)
                .unwrap_or_default(),
        };
        let params = ListParams::new(query.page.unwrap_or(1), query.page_size.unwrap_or(10));

        Ok(self
            .book_repo
            .list(&filter, &params)
            .await
            .context("Failed to list books")?)
    }

    pub async fn get(&self, id: i64) -> Result<Book, BookServiceError> {
        let key = book_key(id);
        if let Ok(Some(book)) = self.cache.get::<Book>(&key).await {
            return Ok(book);
        }

        let book = self
            .book_repo
            .get_by_id(id)
            .await
            .context("Failed to get book")?
            .ok_or(BookServiceError::NotFound)?;

        if let Err(e) = self.cache.set(&key, &book, self.cache.default_ttl()).await {
            tracing::warn!("Failed to cache {}: {}", key, e);
        }
        Ok(book)
    }

    pub async fn create(&self, input: BookInput) -> Result<Book, BookServiceError> {
        let draft = self.validate(input, None, None).await?;
        let record = Self::to_record(draft);

        let book = match self.book_repo.create(&record).await {
            Ok(book) => book,
            Err(e) if is_unique_violation(&e) => {
                return Err(BookServiceError::Validation(FieldErrors::single("isbn", ISBN_TAKEN)))
            }
            Err(e) => return Err(BookServiceError::InternalError(e.context("Failed to create book"))),
        };

        self.invalidate(&["author:*"]).await;
        if matches!(record.author, BookAuthor::New(_)) {
            tracing::info!(author_id = book.author_id, "Author created for book");
        }
        tracing::info!(book_id = book.id, "Book created");
        Ok(book)
    }

    /// Replace a book (`partial = false`) or change only the given fields
    pub async fn update(
        &self,
        id: i64,
        input: BookInput,
        partial: bool,
    ) -> Result<Book, BookServiceError> {
        let existing = self
            .book_repo
            .get_by_id(id)
            .await
            .context("Failed to get book")?
            .ok_or(BookServiceError::NotFound)?;

        let fallback = if partial { Some(&existing) } else { None };
        let draft = self.validate(input, fallback, Some(id)).await?;
        let record = Self::to_record(draft);

        let book = match self.book_repo.update(id, &record).await {
            Ok(Some(book)) => book,
            Ok(None) => return Err(BookServiceError::NotFound),
            Err(e) if is_unique_violation(&e) => {
                return Err(BookServiceError::Validation(FieldErrors::single("isbn", ISBN_TAKEN)))
            }
            Err(e) => return Err(BookServiceError::InternalError(e.context("Failed to update book"))),
        };

        self.invalidate(&[&book_key(id), "author:*"]).await;
        Ok(book)
    }

    pub async fn delete(&self, id: i64) -> Result<(), BookServiceError> {
        let deleted = self
            .book_repo
            .delete(id)
            .await
            .context("Failed to delete book")?;
        if !deleted {
            return Err(BookServiceError::NotFound);
        }

        self.invalidate(&[&book_key(id), "author:*"]).await;
        tracing::info!(book_id = id, "Book deleted");
        Ok(())
    }

    async fn validate(
        &self,
        input: BookInput,
        fallback: Option<&Book>,
        exclude_id: Option<i64>,
    ) -> Result<BookDraft, BookServiceError> {
        let mut errors = FieldErrors::new();

        let title = match &input.title {
            Some(raw) => errors.check("title", clean_title(raw)),
            None => fallback.map(|b| b.title.clone()),
        };

        let author = self.resolve_author(&input, fallback, &mut errors).await?;

        let publication_year = match &input.publication_year {
            Some(raw) => errors.check(
                "publication_year",
                clean_publication_year(raw, self.max_years_ahead),
            ),
            None => fallback.map(|b| b.publication_year),
        };

        let isbn = match &input.isbn {
            Some(raw) => errors.check("isbn", clean_isbn(Some(raw))),
            None => Some(fallback.and_then(|b| b.isbn.clone())),
        };

        if title.is_none() && input.title.is_none() {
            errors.add("title", "This field is required.");
        }
        if publication_year.is_none() && input.publication_year.is_none() {
            errors.add("publication_year", "This field is required.");
        }

        let (Some(title), Some(author), Some(publication_year), Some(isbn)) =
            (title, author, publication_year, isbn)
        else {
            return Err(BookServiceError::Validation(errors));
        };
        if !errors.is_empty() {
            return Err(BookServiceError::Validation(errors));
        }

        if let Some(isbn) = &isbn {
            if self
                .book_repo
                .isbn_taken(isbn, exclude_id)
                .await
                .context("Failed to check ISBN")?
            {
                errors.add("isbn", ISBN_TAKEN);
            }
        }
        if self
            .book_repo
            .duplicate_exists(&title, author.name(), exclude_id)
            .await
            .context("Failed to check for duplicate book")?
        {
            errors.add(
                NON_FIELD_ERRORS,
                "A book with this title by this author already exists.",
            );
        }
        errors.into_result().map_err(BookServiceError::Validation)?;

        Ok(BookDraft {
            title,
            author,
            publication_year,
            isbn,
        })
    }

    async fn resolve_author(
        &self,
        input: &BookInput,
        fallback: Option<&Book>,
        errors: &mut FieldErrors,
    ) -> Result<Option<AuthorRef>, BookServiceError> {
        if let Some(raw) = &input.author_name {
            let Some(name) = errors.check("author_name", clean_author_name(raw)) else {
                return Ok(None);
            };
            let existing = self
                .author_repo
                .find_by_name(&name)
                .await
                .context("Failed to look up author")?;
            return Ok(Some(match existing {
                Some(author) => AuthorRef::Existing {
                    id: author.id,
                    name: author.name,
                },
                None => AuthorRef::New(name),
            }));
        }

        if let Some(id) = input.author_id {
            let existing = self
                .author_repo
                .get_by_id(id)
                .await
                .context("Failed to look up author")?;
            return Ok(match existing {
                Some(author) => Some(AuthorRef::Existing {
                    id: author.id,
                    name: author.name,
                }),
                None => {
                    errors.add("author", "Select a valid author.");
                    None
                }
            });
        }

        match fallback {
            Some(book) => Ok(Some(AuthorRef::Existing {
                id: book.author_id,
                name: book.author_name.clone(),
            })),
            None => {
                errors.add("author", "This field is required.");
                Ok(None)
            }
        }
    }

    /// The row to write; a new author is inserted together with the book
    fn to_record(draft: BookDraft) -> BookRecord {
        let author = match draft.author {
            AuthorRef::Existing { id, .. } => BookAuthor::Existing(id),
            AuthorRef::New(name) => BookAuthor::New(name),
        };
        BookRecord {
            title: draft.title,
            author,
            publication_year: draft.publication_year,
            isbn: draft.isbn,
        }
    }

    async fn invalidate(&self, patterns: &[&str]) {
        for pattern in patterns {
            if let Err(e) = self.cache.delete_pattern(pattern).await {
                tracing::warn!("Failed to invalidate {}: {}", pattern, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::repositories::{SqlxAuthorRepository, SqlxBookRepository};
    use crate::db::{create_test_pool, migrations};
    use serde_json::json;

    async fn setup() -> BookService {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        BookService::new(
            SqlxBookRepository::boxed(pool.clone()),
            SqlxAuthorRepository::boxed(pool),
            Arc::new(Cache::Memory(MemoryCache::new())),
            5,
        )
    }

    fn input(title: &str, author: &str, year: i32, isbn: Option<&str>) -> BookInput {
        BookInput {
            title: Some(title.into()),
            author_name: Some(author.into()),
            publication_year: Some(json!(year)),
            isbn: isbn.map(String::from),
            ..BookInput::default()
        }
    }

    fn validation_errors(result: Result<Book, BookServiceError>) -> FieldErrors {
        match result {
            Err(BookServiceError::Validation(errors)) => errors,
            other => panic!("expected validation error, got {:?}", other.map(|b| b.id)),
        }
    }

    #[tokio::test]
    async fn test_create_valid_book() {
        let service = setup().await;
        let book = service
            .create(input("Valid Title 1", "Test Author", 2020, None))
            .await
            .unwrap();
        assert_eq!(book.title, "Valid Title 1");
        assert_eq!(book.author_name, "Test Author");
        assert_eq!(book.publication_year, 2020);
    }

    #[tokio::test]
    async fn test_short_title_rejected() {
        let service = setup().await;
        let errors = validation_errors(service.create(input("A", "Test Author", 2020, None)).await);
        assert!(errors.contains("title"));
    }

    #[tokio::test]
    async fn test_all_field_errors_reported_together() {
        let service = setup().await;
        let errors = validation_errors(
            service
                .create(BookInput {
                    title: Some("<script>x".into()),
                    publication_year: Some(json!("soon")),
                    isbn: Some("123".into()),
                    ..BookInput::default()
                })
                .await,
        );
        for field in ["title", "author", "publication_year", "isbn"] {
            assert!(errors.contains(field), "missing error for {}", field);
        }
    }

    #[tokio::test]
    async fn test_author_reused_case_insensitively() {
        let service = setup().await;
        let first = service
            .create(input("Emma", "Jane Austen", 1815, None))
            .await
            .unwrap();
        let second = service
            .create(input("Persuasion", "jane austen", 1817, None))
            .await
            .unwrap();
        assert_eq!(first.author_id, second.author_id);
    }

    #[tokio::test]
    async fn test_duplicate_isbn_rejected() {
        let service = setup().await;
        service
            .create(input("First Book", "Some Author", 2001, Some("9780000000001")))
            .await
            .unwrap();

        let errors = validation_errors(
            service
                .create(input("Second Book", "Some Author", 2002, Some("9780000000001")))
                .await,
        );
        assert_eq!(errors.get("isbn").unwrap(), [ISBN_TAKEN.to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_title_and_author_rejected() {
        let service = setup().await;
        service
            .create(input("Dracula", "Bram Stoker", 1897, None))
            .await
            .unwrap();

        let errors = validation_errors(
            service
                .create(input("DRACULA", "bram stoker", 1898, None))
                .await,
        );
        assert!(errors.contains(NON_FIELD_ERRORS));
    }

    #[tokio::test]
    async fn test_unknown_author_id_rejected() {
        let service = setup().await;
        let errors = validation_errors(
            service
                .create(BookInput {
                    title: Some("Orphan".into()),
                    author_id: Some(404),
                    publication_year: Some(json!(2000)),
                    ..BookInput::default()
                })
                .await,
        );
        assert!(errors.contains("author"));
    }

    #[tokio::test]
    async fn test_partial_update_keeps_other_fields() {
        let service = setup().await;
        let book = service
            .create(input("Pride & Prejudice", "Jane Austen", 1813, Some("9780141439518")))
            .await
            .unwrap();
        assert_eq!(book.title, "Pride &amp; Prejudice");

        let updated = service
            .update(
                book.id,
                BookInput {
                    publication_year: Some(json!("1814")),
                    ..BookInput::default()
                },
                true,
            )
            .await
            .unwrap();
        // The stored title is not escaped twice
        assert_eq!(updated.title, "Pride &amp; Prejudice");
        assert_eq!(updated.publication_year, 1814);
        assert_eq!(updated.isbn.as_deref(), Some("9780141439518"));
    }

    #[tokio::test]
    async fn test_full_update_requires_fields_and_keeps_own_isbn() {
        let service = setup().await;
        let book = service
            .create(input("Frankenstein", "Mary Shelley", 1818, Some("9780486282114")))
            .await
            .unwrap();

        let errors = validation_errors(
            service
                .update(
                    book.id,
                    BookInput {
                        title: Some("Frankenstein".into()),
                        ..BookInput::default()
                    },
                    false,
                )
                .await,
        );
        assert!(errors.contains("author"));
        assert!(errors.contains("publication_year"));

        // Same ISBN and title on itself is not a duplicate
        let updated = service
            .update(
                book.id,
                input("Frankenstein", "Mary Shelley", 1831, Some("9780486282114")),
                false,
            )
            .await
            .unwrap();
        assert_eq!(updated.publication_year, 1831);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing() {
        let service = setup().await;
        assert!(matches!(
            service.update(99, input("Ghost", "No One", 2000, None), false).await,
            Err(BookServiceError::NotFound)
        ));
        assert!(matches!(service.delete(99).await, Err(BookServiceError::NotFound)));
        assert!(matches!(service.get(99).await, Err(BookServiceError::NotFound)));
    }

    #[tokio::test]
    async fn test_get_served_from_cache_until_update() {
        let service = setup().await;
        let book = service
            .create(input("Cached Book", "Some Author", 2010, None))
            .await
            .unwrap();
        assert_eq!(service.get(book.id).await.unwrap().publication_year, 2010);

        service
            .update(
                book.id,
                BookInput {
                    publication_year: Some(json!(2011)),
                    ..BookInput::default()
                },
                true,
            )
            .await
            .unwrap();
        assert_eq!(service.get(book.id).await.unwrap().publication_year, 2011);
    }

    #[tokio::test]
    async fn test_list_search_and_limits() {
        let service = setup().await;
        service
            .create(input("The Great Gatsby", "F. Scott Fitzgerald", 1925, None))
            .await
            .unwrap();
        service
            .create(input("Nineteen Eighty-Four", "George Orwell", 1949, None))
            .await
            .unwrap();

        let found = service
            .list(&BookListQuery {
                search: Some("orwell".into()),
                ..BookListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(found.total, 1);

        let ordered = service
            .list(&BookListQuery {
                ordering: Some("-publication_year".into()),
                ..BookListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(ordered.items[0].publication_year, 1949);

        match service
            .list(&BookListQuery {
                search: Some("x".repeat(101)),
                ..BookListQuery::default()
            })
            .await
        {
            Err(BookServiceError::Validation(errors)) => assert!(errors.contains("search")),
            other => panic!("expected validation error, got {:?}", other.map(|p| p.total)),
        }
    }
}
