//! Book catalog endpoints
//!
//! Reads follow the `access.books_read` policy; writes need the matching
//! catalog permission (`can_create`, `can_edit`, `can_delete`).

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};

use crate::api::extract::{ApiJson, ApiPath, ApiQuery};
use crate::api::middleware::{ApiError, AppState, CurrentUser, MaybeUser};
use crate::api::responses::ListResponse;
use crate::models::Book;
use crate::services::{Action, BookInput, BookListQuery, Resource};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/books/", get(list_books).post(create_book))
        .route("/books/create/", post(create_book))
        .route(
            "/books/{id}/",
            get(get_book)
                .put(replace_book)
                .patch(patch_book)
                .delete(delete_book),
        )
        .route("/books/{id}/update/", put(replace_book).patch(patch_book))
        .route("/books/{id}/delete/", delete(delete_book))
}

/// GET /api/v1/books/
async fn list_books(
    State(state): State<AppState>,
    auth: MaybeUser,
    ApiQuery(query): ApiQuery<BookListQuery>,
) -> Result<Json<ListResponse<Book>>, ApiError> {
    state.authorize(auth.as_ref(), Action::List, Resource::Book)?;
    let page = state.book_service.list(&query).await?;
    Ok(Json(page.into()))
}

/// GET /api/v1/books/{id}/
async fn get_book(
    State(state): State<AppState>,
    auth: MaybeUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Book>, ApiError> {
    state.authorize(auth.as_ref(), Action::View, Resource::Book)?;
    Ok(Json(state.book_service.get(id).await?))
}

/// POST /api/v1/books/
async fn create_book(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiJson(body): ApiJson<BookInput>,
) -> Result<impl IntoResponse, ApiError> {
    state.authorize(Some(&auth), Action::Create, Resource::Book)?;
    let book = state.book_service.create(body).await?;
    tracing::info!(book_id = book.id, user_id = auth.user.id, "Book added to catalog");
    Ok((StatusCode::CREATED, Json(book)))
}

/// PUT /api/v1/books/{id}/
async fn replace_book(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<BookInput>,
) -> Result<Json<Book>, ApiError> {
    state.authorize(Some(&auth), Action::Update, Resource::Book)?;
    Ok(Json(state.book_service.update(id, body, false).await?))
}

/// PATCH /api/v1/books/{id}/
async fn patch_book(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<BookInput>,
) -> Result<Json<Book>, ApiError> {
    state.authorize(Some(&auth), Action::Update, Resource::Book)?;
    Ok(Json(state.book_service.update(id, body, true).await?))
}

/// DELETE /api/v1/books/{id}/
async fn delete_book(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.authorize(Some(&auth), Action::Delete, Resource::Book)?;
    state.book_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
