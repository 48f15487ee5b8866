//! Comment endpoints

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::api::common::PaginationQuery;
use crate::api::extract::{ApiJson, ApiPath, ApiQuery};
use crate::api::middleware::{ApiError, AppState, CurrentUser, MaybeUser};
use crate::api::responses::ListResponse;
use crate::models::Comment;
use crate::services::{Action, CommentInput, Resource};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/posts/{id}/comments/",
            get(list_comments).post(create_comment),
        )
        .route(
            "/comments/{id}/",
            get(get_comment)
                .put(replace_comment)
                .patch(patch_comment)
                .delete(delete_comment),
        )
}

/// GET /api/v1/posts/{id}/comments/ - oldest first
async fn list_comments(
    State(state): State<AppState>,
    auth: MaybeUser,
    ApiPath(post_id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<PaginationQuery>,
) -> Result<Json<ListResponse<Comment>>, ApiError> {
    state.authorize(auth.as_ref(), Action::List, Resource::Comment { owner_id: None })?;
    let page = state
        .comment_service
        .list_for_post(post_id, &query.params())
        .await?;
    Ok(Json(page.into()))
}

async fn create_comment(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath(post_id): ApiPath<i64>,
    ApiJson(body): ApiJson<CommentInput>,
) -> Result<impl IntoResponse, ApiError> {
    state.authorize(Some(&auth), Action::Create, Resource::Comment { owner_id: None })?;
    let comment = state
        .comment_service
        .create(post_id, auth.user.id, body)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn get_comment(
    State(state): State<AppState>,
    auth: MaybeUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Comment>, ApiError> {
    state.authorize(auth.as_ref(), Action::View, Resource::Comment { owner_id: None })?;
    Ok(Json(state.comment_service.get(id).await?))
}

async fn replace_comment(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<CommentInput>,
) -> Result<Json<Comment>, ApiError> {
    let comment = state.comment_service.get(id).await?;
    let owner_id = Some(comment.author_id);
    state.authorize(Some(&auth), Action::Update, Resource::Comment { owner_id })?;

    Ok(Json(state.comment_service.update(id, body).await?))
}

/// PATCH without content changes nothing
async fn patch_comment(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<CommentInput>,
) -> Result<Json<Comment>, ApiError> {
    let comment = state.comment_service.get(id).await?;
    let owner_id = Some(comment.author_id);
    state.authorize(Some(&auth), Action::Update, Resource::Comment { owner_id })?;

    if body.content.is_none() {
        return Ok(Json(comment));
    }
    Ok(Json(state.comment_service.update(id, body).await?))
}

async fn delete_comment(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    let comment = state.comment_service.get(id).await?;
    let owner_id = Some(comment.author_id);
    state.authorize(Some(&auth), Action::Delete, Resource::Comment { owner_id })?;

    state.comment_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
