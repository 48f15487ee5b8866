//! Social and account administration endpoints
//!
//! - GET /api/v1/users/{id}/ - public profile with relationship counts
//! - POST /api/v1/users/{id}/follow, /unfollow
//! - GET /api/v1/users/{id}/followers, /following
//! - PUT /api/v1/users/{id}/roles/ - superusers only

use axum::{
    extract::State,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::common::PaginationQuery;
use crate::api::extract::{ApiJson, ApiPath, ApiQuery};
use crate::api::middleware::{ApiError, AppState, CurrentUser, MaybeUser};
use crate::api::responses::{ListResponse, PermissionsResponse};
use crate::models::{FollowOutcome, Role, UserSummary};
use crate::services::{Action, PublicProfile, Resource};

#[derive(Debug, Serialize)]
pub struct FollowResponse {
    pub user_id: i64,
    pub following: bool,
    /// False when the relationship already had the requested state
    pub changed: bool,
}

#[derive(Debug, Deserialize)]
pub struct RolesRequest {
    pub roles: Vec<Role>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/{id}/", get(get_user))
        .route("/users/{id}/follow", post(follow))
        .route("/users/{id}/unfollow", post(unfollow))
        .route("/users/{id}/followers", get(followers))
        .route("/users/{id}/following", get(following))
        .route("/users/{id}/roles/", put(set_roles))
}

async fn get_user(
    State(state): State<AppState>,
    auth: MaybeUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<PublicProfile>, ApiError> {
    let resource = Resource::Profile { owner_id: Some(id) };
    state.authorize(auth.as_ref(), Action::View, resource)?;
    Ok(Json(state.follow_service.profile(id).await?))
}

async fn follow(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<FollowResponse>, ApiError> {
    state.authorize(Some(&auth), Action::Create, Resource::Follow)?;
    let outcome = state.follow_service.follow(auth.user.id, id).await?;
    Ok(Json(FollowResponse {
        user_id: id,
        following: true,
        changed: outcome == FollowOutcome::Changed,
    }))
}

async fn unfollow(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<FollowResponse>, ApiError> {
    state.authorize(Some(&auth), Action::Delete, Resource::Follow)?;
    let outcome = state.follow_service.unfollow(auth.user.id, id).await?;
    Ok(Json(FollowResponse {
        user_id: id,
        following: false,
        changed: outcome == FollowOutcome::Changed,
    }))
}

async fn followers(
    State(state): State<AppState>,
    auth: MaybeUser,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<PaginationQuery>,
) -> Result<Json<ListResponse<UserSummary>>, ApiError> {
    state.authorize(auth.as_ref(), Action::List, Resource::Follow)?;
    let page = state.follow_service.followers(id, &query.params()).await?;
    Ok(Json(page.into()))
}

async fn following(
    State(state): State<AppState>,
    auth: MaybeUser,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<PaginationQuery>,
) -> Result<Json<ListResponse<UserSummary>>, ApiError> {
    state.authorize(auth.as_ref(), Action::List, Resource::Follow)?;
    let page = state.follow_service.following(id, &query.params()).await?;
    Ok(Json(page.into()))
}

/// PUT /api/v1/users/{id}/roles/ - replace the roles of a user
async fn set_roles(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<RolesRequest>,
) -> Result<Json<PermissionsResponse>, ApiError> {
    state.authorize(Some(&auth), Action::Update, Resource::RoleAssignment)?;
    let principal = state.access_service.set_user_roles(id, &body.roles).await?;
    Ok(Json(principal.into()))
}
