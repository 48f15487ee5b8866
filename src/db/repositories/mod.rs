//! Database repositories
//!
//! One repository per aggregate. Each exposes an `async_trait` interface and
//! an `Sqlx*Repository` implementation that dispatches on the pool driver.

pub mod author;
pub mod book;
pub mod comment;
pub mod follow;
pub mod library;
pub mod post;
pub mod profile;
pub mod role;
pub mod session;
pub mod tag;
pub mod user;

pub use author::{AuthorRepository, SqlxAuthorRepository};
pub use book::{BookRepository, SqlxBookRepository};
pub use comment::{CommentRepository, SqlxCommentRepository};
pub use follow::{FollowRepository, SqlxFollowRepository};
pub use library::{LibraryRepository, SqlxLibraryRepository};
pub use post::{PostRepository, SqlxPostRepository};
pub use profile::{ProfileRepository, SqlxProfileRepository};
pub use role::{RoleRepository, SqlxRoleRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use tag::{SqlxTagRepository, TagRepository};
pub use user::{SqlxUserRepository, UserRepository};

/// Escape character used in every `LIKE ... ESCAPE '!'` clause
pub const LIKE_ESCAPE: char = '!';

/// Build a `%term%` pattern with LIKE wildcards in `term` escaped.
///
/// Pair it with `ESCAPE '!'`. The backslash is not used because SQLite and
/// MySQL disagree on its meaning.
pub fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if c == '%' || c == '_' || c == LIKE_ESCAPE {
            pattern.push(LIKE_ESCAPE);
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Whether an error returned by a repository is a unique-constraint violation
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<sqlx::Error>(),
            Some(sqlx::Error::Database(db_err)) if db_err.is_unique_violation()
        )
    })
}
