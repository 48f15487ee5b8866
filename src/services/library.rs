//! Library service
//!
//! A library shelves existing catalog books and has at most one librarian.
//! Shelving is idempotent; a book deleted from the catalog leaves every
//! shelf it was on.

use crate::db::repositories::{is_unique_violation, BookRepository, LibraryRepository};
use crate::models::{Book, Librarian, Library, LibraryWithCount, ListParams, PagedResult};
use crate::services::validation::{clean_librarian_name, clean_library_name, FieldErrors};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum LibraryServiceError {
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Library not found")]
    NotFound,

    #[error("Book not found")]
    BookNotFound,

    #[error("Librarian not found")]
    LibrarianNotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Library detail with its books and librarian nested
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryDetail {
    #[serde(flatten)]
    pub library: Library,
    pub books: Vec<Book>,
    pub librarian: Option<Librarian>,
}

const DUPLICATE_NAME: &str = "A library with this name already exists.";

pub struct LibraryService {
    library_repo: Arc<dyn LibraryRepository>,
    book_repo: Arc<dyn BookRepository>,
}

impl LibraryService {
    pub fn new(library_repo: Arc<dyn LibraryRepository>, book_repo: Arc<dyn BookRepository>) -> Self {
        Self {
            library_repo,
            book_repo,
        }
    }

    pub async fn list(
        &self,
        params: &ListParams,
    ) -> Result<PagedResult<LibraryWithCount>, LibraryServiceError> {
        Ok(self
            .library_repo
            .list(params)
            .await
            .context("Failed to list libraries")?)
    }

    pub async fn get(&self, id: i64) -> Result<LibraryDetail, LibraryServiceError> {
        let library = self.require(id).await?;
        let books = self
            .book_repo
            .list_by_library(id)
            .await
            .context("Failed to list library books")?;
        let librarian = self
            .library_repo
            .librarian(id)
            .await
            .context("Failed to get librarian")?;

        Ok(LibraryDetail {
            library,
            books,
            librarian,
        })
    }

    pub async fn create(&self, raw_name: &str) -> Result<Library, LibraryServiceError> {
        let name = clean_library_name(raw_name)
            .map_err(|message| LibraryServiceError::Validation(FieldErrors::single("name", message)))?;

        let existing = self
            .library_repo
            .find_by_name(&name)
            .await
            .context("Failed to look up library")?;
        if existing.is_some() {
            return Err(duplicate_name());
        }

        let library = match self.library_repo.create(&name).await {
            Ok(library) => library,
            // Lost a race with a concurrent create of the same name
            Err(e) if is_unique_violation(&e) => return Err(duplicate_name()),
            Err(e) => return Err(e.context("Failed to create library").into()),
        };
        tracing::info!(library_id = library.id, "Library created");
        Ok(library)
    }

    /// Delete a library. Its books stay in the catalog.
    pub async fn delete(&self, id: i64) -> Result<(), LibraryServiceError> {
        let deleted = self
            .library_repo
            .delete(id)
            .await
            .context("Failed to delete library")?;
        if !deleted {
            return Err(LibraryServiceError::NotFound);
        }
        tracing::info!(library_id = id, "Library deleted");
        Ok(())
    }

    /// Shelve a catalog book; shelving it twice is not an error
    pub async fn add_book(&self, library_id: i64, book_id: i64) -> Result<(), LibraryServiceError> {
        self.require(library_id).await?;
        self.book_repo
            .get_by_id(book_id)
            .await
            .context("Failed to get book")?
            .ok_or(LibraryServiceError::BookNotFound)?;

        let added = self
            .library_repo
            .add_book(library_id, book_id)
            .await
            .context("Failed to shelve book")?;
        if added {
            tracing::debug!(library_id, book_id, "Book shelved");
        }
        Ok(())
    }

    pub async fn remove_book(&self, library_id: i64, book_id: i64) -> Result<(), LibraryServiceError> {
        self.require(library_id).await?;
        let removed = self
            .library_repo
            .remove_book(library_id, book_id)
            .await
            .context("Failed to unshelve book")?;
        if !removed {
            return Err(LibraryServiceError::BookNotFound);
        }
        Ok(())
    }

    /// Appoint or rename the librarian of a library
    pub async fn set_librarian(
        &self,
        library_id: i64,
        raw_name: &str,
    ) -> Result<Librarian, LibraryServiceError> {
        let name = clean_librarian_name(raw_name)
            .map_err(|message| LibraryServiceError::Validation(FieldErrors::single("name", message)))?;
        self.require(library_id).await?;

        Ok(self
            .library_repo
            .set_librarian(library_id, &name)
            .await
            .context("Failed to set librarian")?)
    }

    pub async fn remove_librarian(&self, library_id: i64) -> Result<(), LibraryServiceError> {
        self.require(library_id).await?;
        let removed = self
            .library_repo
            .remove_librarian(library_id)
            .await
            .context("Failed to remove librarian")?;
        if !removed {
            return Err(LibraryServiceError::LibrarianNotFound);
        }
        Ok(())
    }

    async fn require(&self, id: i64) -> Result<Library, LibraryServiceError> {
        self.library_repo
            .get_by_id(id)
            .await
            .context("Failed to get library")?
            .ok_or(LibraryServiceError::NotFound)
    }
}

fn duplicate_name() -> LibraryServiceError {
    LibraryServiceError::Validation(FieldErrors::single("name", DUPLICATE_NAME))
}
