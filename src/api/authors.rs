//! Author endpoints

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::PaginationQuery;
use crate::api::extract::{ApiJson, ApiPath, ApiQuery};
use crate::api::middleware::{ApiError, AppState, CurrentUser, MaybeUser};
use crate::api::responses::ListResponse;
use crate::models::{Author, AuthorWithCount};
use crate::services::{Action, AuthorDetail, FieldErrors, Resource};

#[derive(Debug, Deserialize)]
pub struct AuthorRequest {
    pub name: Option<String>,
}

impl AuthorRequest {
    fn require_name(self) -> Result<String, ApiError> {
        self.name.ok_or_else(|| {
            ApiError::validation(FieldErrors::single("name", "This field is required."))
        })
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/authors/", get(list_authors).post(create_author))
        .route(
            "/authors/{id}/",
            get(get_author)
                .put(replace_author)
                .patch(patch_author)
                .delete(delete_author),
        )
}

/// GET /api/v1/authors/
async fn list_authors(
    State(state): State<AppState>,
    auth: MaybeUser,
    ApiQuery(query): ApiQuery<PaginationQuery>,
) -> Result<Json<ListResponse<AuthorWithCount>>, ApiError> {
    state.authorize(auth.as_ref(), Action::List, Resource::Author)?;
    let page = state.author_service.list(&query.params()).await?;
    Ok(Json(page.into()))
}

/// GET /api/v1/authors/{id}/ - nests the author's books
async fn get_author(
    State(state): State<AppState>,
    auth: MaybeUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<AuthorDetail>, ApiError> {
    state.authorize(auth.as_ref(), Action::View, Resource::Author)?;
    Ok(Json(state.author_service.get(id).await?))
}

async fn create_author(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiJson(body): ApiJson<AuthorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.authorize(Some(&auth), Action::Create, Resource::Author)?;
    let author = state.author_service.create(&body.require_name()?).await?;
    Ok((StatusCode::CREATED, Json(author)))
}

async fn replace_author(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<AuthorRequest>,
) -> Result<Json<Author>, ApiError> {
    state.authorize(Some(&auth), Action::Update, Resource::Author)?;
    Ok(Json(state.author_service.update(id, &body.require_name()?).await?))
}

/// PATCH without a name changes nothing
async fn patch_author(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<AuthorRequest>,
) -> Result<Json<Author>, ApiError> {
    state.authorize(Some(&auth), Action::Update, Resource::Author)?;
    let author = match body.name {
        Some(name) => state.author_service.update(id, &name).await?,
        None => state.author_service.get(id).await?.author,
    };
    Ok(Json(author))
}

/// DELETE /api/v1/authors/{id}/ - removes the author's books too
async fn delete_author(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.authorize(Some(&auth), Action::Delete, Resource::Author)?;
    state.author_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
