//! Blog post endpoints
//!
//! Anyone may read (per `access.posts_read`); any logged-in user may write
//! a post; only its author may change or delete it.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::api::extract::{ApiJson, ApiPath, ApiQuery};
use crate::api::middleware::{ApiError, AppState, CurrentUser, MaybeUser};
use crate::api::responses::ListResponse;
use crate::models::Post;
use crate::services::{Action, PostInput, PostListQuery, PostSearchQuery, Resource};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts/", get(list_posts).post(create_post))
        .route("/posts/search/", get(search_posts))
        .route(
            "/posts/{id}/",
            get(get_post)
                .put(replace_post)
                .patch(patch_post)
                .delete(delete_post),
        )
}

/// GET /api/v1/posts/?tag=&author=
async fn list_posts(
    State(state): State<AppState>,
    auth: MaybeUser,
    ApiQuery(query): ApiQuery<PostListQuery>,
) -> Result<Json<ListResponse<Post>>, ApiError> {
    state.authorize(auth.as_ref(), Action::List, Resource::Post { owner_id: None })?;
    Ok(Json(state.post_service.list(&query).await?.into()))
}

/// GET /api/v1/posts/search/?q=
async fn search_posts(
    State(state): State<AppState>,
    auth: MaybeUser,
    ApiQuery(query): ApiQuery<PostSearchQuery>,
) -> Result<Json<ListResponse<Post>>, ApiError> {
    state.authorize(auth.as_ref(), Action::List, Resource::Post { owner_id: None })?;
    Ok(Json(state.post_service.search(&query).await?.into()))
}

async fn get_post(
    State(state): State<AppState>,
    auth: MaybeUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Post>, ApiError> {
    // Reads never depend on the owner
    state.authorize(auth.as_ref(), Action::View, Resource::Post { owner_id: None })?;
    Ok(Json(state.post_service.get(id).await?))
}

async fn create_post(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiJson(body): ApiJson<PostInput>,
) -> Result<impl IntoResponse, ApiError> {
    state.authorize(Some(&auth), Action::Create, Resource::Post { owner_id: None })?;
    let post = state.post_service.create(auth.user.id, body).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn replace_post(
    state: State<AppState>,
    user: CurrentUser,
    id: ApiPath<i64>,
    body: ApiJson<PostInput>,
) -> Result<Json<Post>, ApiError> {
    update_post(state, user, id, body, false).await
}

async fn patch_post(
    state: State<AppState>,
    user: CurrentUser,
    id: ApiPath<i64>,
    body: ApiJson<PostInput>,
) -> Result<Json<Post>, ApiError> {
    update_post(state, user, id, body, true).await
}

async fn update_post(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<PostInput>,
    partial: bool,
) -> Result<Json<Post>, ApiError> {
    let post = state.post_service.get(id).await?;
    let owner_id = Some(post.author_id);
    state.authorize(Some(&auth), Action::Update, Resource::Post { owner_id })?;

    Ok(Json(state.post_service.update(&post, body, partial).await?))
}

async fn delete_post(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    let post = state.post_service.get(id).await?;
    let owner_id = Some(post.author_id);
    state.authorize(Some(&auth), Action::Delete, Resource::Post { owner_id })?;

    state.post_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
