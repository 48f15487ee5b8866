//! Services layer - Business logic
//!
//! Services sit between the HTTP handlers and the repositories. They:
//! - clean and validate input, collecting field errors
//! - coordinate repositories and the cache
//! - translate store failures into typed errors
//!
//! Access decisions live in [`access`]; handlers consult them before calling
//! into the other services.

pub mod access;
pub mod author;
pub mod book;
pub mod comment;
pub mod follow;
pub mod library;
pub mod password;
pub mod post;
pub mod rate_limiter;
pub mod tag;
pub mod user;
pub mod validation;

pub use access::{authorize, AccessService, AccessServiceError, Action, Decision, DenyReason, Resource};
pub use author::{AuthorDetail, AuthorService, AuthorServiceError};
pub use book::{BookInput, BookListQuery, BookService, BookServiceError};
pub use comment::{CommentInput, CommentService, CommentServiceError};
pub use follow::{FollowService, FollowServiceError, PublicProfile};
pub use library::{LibraryDetail, LibraryService, LibraryServiceError};
pub use password::{hash_password, verify_password};
pub use post::{PostInput, PostListQuery, PostSearchQuery, PostService, PostServiceError};
pub use rate_limiter::LoginRateLimiter;
pub use tag::{TagService, TagServiceError, TaggedPosts};
pub use user::{LoginInput, RegisterInput, Registration, UserService, UserServiceError};
pub use validation::{FieldErrors, NON_FIELD_ERRORS};
