//! Data models
//!
//! Entities of the catalog (Author, Book, Library), the blog (Post, Comment, Tag),
//! accounts (User, Profile, Session) and the permission vocabulary shared by
//! the access control layer.

mod author;
mod book;
mod comment;
mod follow;
mod library;
mod pagination;
mod permission;
mod post;
mod profile;
mod session;
mod tag;
mod user;

pub use author::{Author, AuthorWithCount};
pub use book::{Book, BookAuthor, BookFilter, BookOrdering, BookRecord};
pub use comment::Comment;
pub use follow::{FollowCounts, FollowOutcome, UserSummary};
pub use library::{Librarian, Library, LibraryWithCount};
pub use pagination::{ListParams, PagedResult, MAX_PAGE_SIZE};
pub use permission::{Permission, PermissionSet, Principal, ReadAccess, Role};
pub use post::{Post, PostRecord, PostScope, SearchTerm};
pub use profile::{Profile, ProfileChanges};
pub use session::Session;
pub use tag::{slugify, Tag, TagWithCount};
pub use user::{User, UserStatus};
