//! Tag endpoints

use axum::{
    extract::State,
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::api::common::PaginationQuery;
use crate::api::extract::{ApiPath, ApiQuery};
use crate::api::middleware::{ApiError, AppState, MaybeUser};
use crate::api::responses::ListResponse;
use crate::models::{Post, Tag, TagWithCount};
use crate::services::{Action, Resource};

#[derive(Debug, Serialize)]
pub struct TagPostsResponse {
    pub tag: Tag,
    #[serde(flatten)]
    pub posts: ListResponse<Post>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tags/", get(list_tags))
        .route("/tags/{slug}/posts/", get(tag_posts))
}

/// GET /api/v1/tags/
async fn list_tags(
    State(state): State<AppState>,
    auth: MaybeUser,
) -> Result<Json<Vec<TagWithCount>>, ApiError> {
    state.authorize(auth.as_ref(), Action::List, Resource::Post { owner_id: None })?;
    Ok(Json(state.tag_service.list().await?))
}

/// GET /api/v1/tags/{slug}/posts/
async fn tag_posts(
    State(state): State<AppState>,
    auth: MaybeUser,
    ApiPath(slug): ApiPath<String>,
    ApiQuery(query): ApiQuery<PaginationQuery>,
) -> Result<Json<TagPostsResponse>, ApiError> {
    state.authorize(auth.as_ref(), Action::List, Resource::Post { owner_id: None })?;
    let tagged = state.tag_service.posts(&slug, &query.params()).await?;
    Ok(Json(TagPostsResponse {
        tag: tagged.tag,
        posts: tagged.posts.into(),
    }))
}
