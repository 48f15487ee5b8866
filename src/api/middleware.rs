//! API middleware
//!
//! Contains:
//! - the shared application state
//! - authentication (session token from Bearer header or cookie)
//! - the `ApiError` type every handler returns

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;

use crate::api::security::SecurityHeaders;
use crate::cache::{create_cache, Cache};
use crate::config::Config;
use crate::db::repositories::{
    SqlxAuthorRepository, SqlxBookRepository, SqlxCommentRepository, SqlxFollowRepository,
    SqlxLibraryRepository, SqlxPostRepository, SqlxProfileRepository, SqlxRoleRepository,
    SqlxSessionRepository, SqlxTagRepository, SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::models::{Principal, User};
use crate::services::{
    authorize, AccessService, AccessServiceError, Action, AuthorService, AuthorServiceError,
    BookService, BookServiceError, CommentService, CommentServiceError, DenyReason, FieldErrors,
    FollowService, FollowServiceError, LibraryService, LibraryServiceError, LoginRateLimiter,
    PostService, PostServiceError, Resource, TagService, TagServiceError, UserService,
    UserServiceError,
};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub config: Arc<Config>,
    pub cache: Arc<Cache>,
    pub security: Arc<SecurityHeaders>,
    pub user_service: Arc<UserService>,
    pub access_service: Arc<AccessService>,
    pub book_service: Arc<BookService>,
    pub author_service: Arc<AuthorService>,
    pub library_service: Arc<LibraryService>,
    pub post_service: Arc<PostService>,
    pub comment_service: Arc<CommentService>,
    pub tag_service: Arc<TagService>,
    pub follow_service: Arc<FollowService>,
}

impl AppState {
    /// Wire every repository and service over one pool
    pub fn new(pool: DynDatabasePool, config: Config) -> Self {
        let cache = create_cache(&config.cache);

        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let profile_repo = SqlxProfileRepository::boxed(pool.clone());
        let author_repo = SqlxAuthorRepository::boxed(pool.clone());
        let book_repo = SqlxBookRepository::boxed(pool.clone());
        let post_repo = SqlxPostRepository::boxed(pool.clone());

        let user_service = UserService::new(
            user_repo.clone(),
            SqlxSessionRepository::boxed(pool.clone()),
            profile_repo.clone(),
            Arc::new(LoginRateLimiter::new()),
        )
        .with_session_days(config.auth.session_days)
        .with_default_role(config.auth.default_role);

        Self {
            access_service: Arc::new(AccessService::new(
                SqlxRoleRepository::boxed(pool.clone()),
                user_repo.clone(),
                cache.clone(),
            )),
            book_service: Arc::new(BookService::new(
                book_repo.clone(),
                author_repo.clone(),
                cache.clone(),
                config.validation.max_years_ahead,
            )),
            author_service: Arc::new(AuthorService::new(author_repo, book_repo.clone(), cache.clone())),
            library_service: Arc::new(LibraryService::new(
                SqlxLibraryRepository::boxed(pool.clone()),
                book_repo,
            )),
            post_service: Arc::new(PostService::new(post_repo.clone())),
            comment_service: Arc::new(CommentService::new(
                SqlxCommentRepository::boxed(pool.clone()),
                post_repo.clone(),
            )),
            tag_service: Arc::new(TagService::new(SqlxTagRepository::boxed(pool.clone()), post_repo)),
            follow_service: Arc::new(FollowService::new(
                SqlxFollowRepository::boxed(pool.clone()),
                user_repo,
                profile_repo,
            )),
            user_service: Arc::new(user_service),
            security: Arc::new(SecurityHeaders::from_config(&config.security)),
            config: Arc::new(config),
            cache,
            pool,
        }
    }

    /// Consult the access rules for the caller, using the configured read
    /// policy of the resource
    pub fn authorize(
        &self,
        auth: Option<&AuthContext>,
        action: Action,
        resource: Resource,
    ) -> Result<(), ApiError> {
        let read_access = resource.read_policy(&self.config.access);
        authorize(auth.map(|a| &a.principal), action, resource, read_access)
            .into_result()
            .map_err(ApiError::from)
    }

    /// `Set-Cookie` value carrying a session token
    pub fn session_cookie(&self, token: &str) -> String {
        let mut cookie = format!(
            "session={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            token,
            self.config.auth.session_days * 24 * 60 * 60
        );
        if self.config.auth.secure_cookies {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// The logged-in caller of a request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub principal: Principal,
    /// Session token the request authenticated with
    pub token: String,
}

/// Extractor for endpoints that need a logged-in user. Rejects with 401.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthContext);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| ApiError::unauthorized(DenyReason::Unauthenticated.to_string()))
    }
}

/// Extractor for endpoints open to anonymous callers
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<AuthContext>);

impl MaybeUser {
    pub fn as_ref(&self) -> Option<&AuthContext> {
        self.0.as_ref()
    }
}

impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(parts.extensions.get::<AuthContext>().cloned()))
    }
}

/// Extract session token from request headers. Bearer wins over the cookie.
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            let token = auth_str
                .strip_prefix("Bearer ")
                .or_else(|| auth_str.strip_prefix("Token "));
            if let Some(token) = token {
                return Some(token.trim().to_string());
            }
        }
    }

    if let Some(cookie_header) = headers.get(header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                let cookie = cookie.trim();
                if let Some(token) = cookie.strip_prefix("session=") {
                    if !token.is_empty() {
                        return Some(token.to_string());
                    }
                }
            }
        }
    }

    None
}

/// Authentication middleware
///
/// Resolves the session token, when one is sent, into an [`AuthContext`]
/// request extension. Requests without a valid token pass through
/// anonymously; each handler decides whether that is enough.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(token) = extract_session_token(request.headers()) {
        if let Some(user) = state.user_service.validate_session(&token).await? {
            let principal = state.access_service.principal_for(&user).await?;
            request.extensions_mut().insert(AuthContext {
                user,
                principal,
                token,
            });
        }
    }
    Ok(next.run(request).await)
}

// ============================================================================
// Errors
// ============================================================================

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    /// Field-keyed validation failure
    pub fn validation(errors: FieldErrors) -> Self {
        Self::with_details(
            "VALIDATION_ERROR",
            "Invalid input",
            serde_json::to_value(errors).unwrap_or_default(),
        )
    }

    pub fn conflict(errors: FieldErrors) -> Self {
        Self::with_details(
            "CONFLICT",
            "Already exists",
            serde_json::to_value(errors).unwrap_or_default(),
        )
    }

    pub fn rate_limited(retry_after: u64) -> Self {
        Self::with_details(
            "RATE_LIMIT",
            "Too many login attempts, please try again later",
            serde_json::json!({ "retry_after": retry_after }),
        )
    }

    /// Log the cause and hide it behind a generic message
    pub fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!("Request failed: {:#}", err);
        Self::new("INTERNAL_ERROR", "An unexpected error occurred")
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "VALIDATION_ERROR" | "INVALID_CREDENTIALS" => StatusCode::BAD_REQUEST,
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "CONFLICT" => StatusCode::CONFLICT,
            "RATE_LIMIT" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<DenyReason> for ApiError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::Unauthenticated => ApiError::unauthorized(reason.to_string()),
            _ => ApiError::forbidden(reason.to_string()),
        }
    }
}

impl From<UserServiceError> for ApiError {
    fn from(err: UserServiceError) -> Self {
        match err {
            UserServiceError::Validation(errors) => ApiError::validation(errors),
            UserServiceError::InvalidCredentials => {
                ApiError::new("INVALID_CREDENTIALS", "Invalid credentials")
            }
            UserServiceError::Conflict(errors) => ApiError::conflict(errors),
            UserServiceError::RateLimited { retry_after } => ApiError::rate_limited(retry_after),
            UserServiceError::NotFound => ApiError::not_found("User not found"),
            UserServiceError::InternalError(e) => ApiError::internal(e),
        }
    }
}

impl From<AccessServiceError> for ApiError {
    fn from(err: AccessServiceError) -> Self {
        match err {
            AccessServiceError::UserNotFound => ApiError::not_found("User not found"),
            AccessServiceError::InternalError(e) => ApiError::internal(e),
        }
    }
}

impl From<BookServiceError> for ApiError {
    fn from(err: BookServiceError) -> Self {
        match err {
            BookServiceError::Validation(errors) => ApiError::validation(errors),
            BookServiceError::NotFound => ApiError::not_found("Book not found"),
            BookServiceError::InternalError(e) => ApiError::internal(e),
        }
    }
}

impl From<AuthorServiceError> for ApiError {
    fn from(err: AuthorServiceError) -> Self {
        match err {
            AuthorServiceError::Validation(errors) => ApiError::validation(errors),
            AuthorServiceError::NotFound => ApiError::not_found("Author not found"),
            AuthorServiceError::InternalError(e) => ApiError::internal(e),
        }
    }
}

impl From<PostServiceError> for ApiError {
    fn from(err: PostServiceError) -> Self {
        match err {
            PostServiceError::Validation(errors) => ApiError::validation(errors),
            PostServiceError::NotFound => ApiError::not_found("Post not found"),
            PostServiceError::InternalError(e) => ApiError::internal(e),
        }
    }
}

impl From<CommentServiceError> for ApiError {
    fn from(err: CommentServiceError) -> Self {
        match err {
            CommentServiceError::Validation(errors) => ApiError::validation(errors),
            CommentServiceError::NotFound => ApiError::not_found("Comment not found"),
            CommentServiceError::PostNotFound => ApiError::not_found("Post not found"),
            CommentServiceError::InternalError(e) => ApiError::internal(e),
        }
    }
}

impl From<TagServiceError> for ApiError {
    fn from(err: TagServiceError) -> Self {
        match err {
            TagServiceError::NotFound => ApiError::not_found("Tag not found"),
            TagServiceError::InternalError(e) => ApiError::internal(e),
        }
    }
}

impl From<LibraryServiceError> for ApiError {
    fn from(err: LibraryServiceError) -> Self {
        match err {
            LibraryServiceError::Validation(errors) => ApiError::validation(errors),
            LibraryServiceError::NotFound => ApiError::not_found("Library not found"),
            LibraryServiceError::BookNotFound => ApiError::not_found("Book not found"),
            LibraryServiceError::LibrarianNotFound => ApiError::not_found("Librarian not found"),
            LibraryServiceError::InternalError(e) => ApiError::internal(e),
        }
    }
}

impl From<FollowServiceError> for ApiError {
    fn from(err: FollowServiceError) -> Self {
        match err {
            FollowServiceError::SelfFollow => {
                ApiError::validation(FieldErrors::single("user", err.to_string()))
            }
            FollowServiceError::UserNotFound => ApiError::not_found("User not found"),
            FollowServiceError::InternalError(e) => ApiError::internal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(name: header::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_extract_session_token_from_bearer() {
        let headers = headers(header::AUTHORIZATION, "Bearer abc123");
        assert_eq!(extract_session_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn test_extract_session_token_from_drf_style_header() {
        let headers = headers(header::AUTHORIZATION, "Token abc123");
        assert_eq!(extract_session_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn test_extract_session_token_from_cookie() {
        let headers = headers(header::COOKIE, "theme=dark; session=xyz789");
        assert_eq!(extract_session_token(&headers), Some("xyz789".to_string()));
    }

    #[test]
    fn test_extract_session_token_bearer_priority() {
        let mut headers = headers(header::AUTHORIZATION, "Bearer bearer_token");
        headers.insert(header::COOKIE, HeaderValue::from_static("session=cookie_token"));
        assert_eq!(extract_session_token(&headers), Some("bearer_token".to_string()));
    }

    #[test]
    fn test_extract_session_token_none() {
        assert_eq!(extract_session_token(&HeaderMap::new()), None);
        let cleared = headers(header::COOKIE, "session=");
        assert_eq!(extract_session_token(&cleared), None);
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(ApiError::unauthorized("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::rate_limited(5).status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ApiError::new("INVALID_CREDENTIALS", "x").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::new("SOMETHING", "x").status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_deny_reasons_map_to_status() {
        assert_eq!(ApiError::from(DenyReason::Unauthenticated).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::from(DenyReason::NotOwner).status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_validation_error_details() {
        let mut errors = FieldErrors::new();
        errors.add("title", "Too short.");
        let err = ApiError::validation(errors);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.error.details,
            Some(serde_json::json!({ "title": ["Too short."] }))
        );
    }

    #[test]
    fn test_internal_error_hides_cause() {
        let err = ApiError::from(BookServiceError::InternalError(anyhow::anyhow!(
            "database is locked"
        )));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.error.message.contains("locked"));
    }
}
