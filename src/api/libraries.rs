//! Library endpoints

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::PaginationQuery;
use crate::api::extract::{ApiJson, ApiPath, ApiQuery};
use crate::api::middleware::{ApiError, AppState, CurrentUser, MaybeUser};
use crate::api::responses::ListResponse;
use crate::models::{Librarian, LibraryWithCount};
use crate::services::{Action, FieldErrors, LibraryDetail, Resource};

#[derive(Debug, Deserialize)]
pub struct NameRequest {
    pub name: Option<String>,
}

impl NameRequest {
    fn require_name(self) -> Result<String, ApiError> {
        self.name.ok_or_else(|| {
            ApiError::validation(FieldErrors::single("name", "This field is required."))
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ShelveRequest {
    pub book_id: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/libraries/", get(list_libraries).post(create_library))
        .route("/libraries/{id}/", get(get_library).delete(delete_library))
        .route("/libraries/{id}/books/", post(shelve_book))
        .route("/libraries/{id}/books/{book_id}/", delete(unshelve_book))
        .route(
            "/libraries/{id}/librarian/",
            put(set_librarian).delete(remove_librarian),
        )
}

/// GET /api/v1/libraries/
async fn list_libraries(
    State(state): State<AppState>,
    auth: MaybeUser,
    ApiQuery(query): ApiQuery<PaginationQuery>,
) -> Result<Json<ListResponse<LibraryWithCount>>, ApiError> {
    state.authorize(auth.as_ref(), Action::List, Resource::Library)?;
    let page = state.library_service.list(&query.params()).await?;
    Ok(Json(page.into()))
}

/// GET /api/v1/libraries/{id}/ - nests the shelved books and the librarian
async fn get_library(
    State(state): State<AppState>,
    auth: MaybeUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<LibraryDetail>, ApiError> {
    state.authorize(auth.as_ref(), Action::View, Resource::Library)?;
    Ok(Json(state.library_service.get(id).await?))
}

async fn create_library(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiJson(body): ApiJson<NameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.authorize(Some(&auth), Action::Create, Resource::Library)?;
    let library = state.library_service.create(&body.require_name()?).await?;
    Ok((StatusCode::CREATED, Json(library)))
}

/// DELETE /api/v1/libraries/{id}/ - the books stay in the catalog
async fn delete_library(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.authorize(Some(&auth), Action::Delete, Resource::Library)?;
    state.library_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/libraries/{id}/books/ - answers with the updated detail
async fn shelve_book(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<ShelveRequest>,
) -> Result<Json<LibraryDetail>, ApiError> {
    state.authorize(Some(&auth), Action::Update, Resource::Library)?;
    let book_id = body.book_id.ok_or_else(|| {
        ApiError::validation(FieldErrors::single("book_id", "This field is required."))
    })?;
    state.library_service.add_book(id, book_id).await?;
    Ok(Json(state.library_service.get(id).await?))
}

async fn unshelve_book(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath((id, book_id)): ApiPath<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    state.authorize(Some(&auth), Action::Update, Resource::Library)?;
    state.library_service.remove_book(id, book_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/libraries/{id}/librarian/
async fn set_librarian(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<NameRequest>,
) -> Result<Json<Librarian>, ApiError> {
    state.authorize(Some(&auth), Action::Update, Resource::Library)?;
    let librarian = state
        .library_service
        .set_librarian(id, &body.require_name()?)
        .await?;
    Ok(Json(librarian))
}

async fn remove_librarian(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.authorize(Some(&auth), Action::Update, Resource::Library)?;
    state.library_service.remove_librarian(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
