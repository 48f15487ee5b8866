//! Authentication API endpoints
//!
//! - POST /api/v1/register/ - create an account and log it in
//! - POST /api/v1/login/ - log in, sets the session cookie
//! - POST /api/v1/token/ - log in, token only
//! - POST /api/v1/logout/ - end the current session
//! - GET|PUT|PATCH /api/v1/profile/ - the caller's own profile
//! - GET /api/v1/permissions/ - the caller's roles and permissions

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::extract::ApiJson;
use crate::api::middleware::{ApiError, AppState, CurrentUser};
use crate::api::responses::{PermissionsResponse, ProfileResponse, UserResponse};
use crate::api::security::ClientIp;
use crate::models::ProfileChanges;
use crate::services::{Action, LoginInput, RegisterInput, Resource};

/// Request body for user registration
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password2: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: i64,
    pub username: String,
    pub token: String,
}

/// Request body for user login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(alias = "username_or_email")]
    pub username: String,
    pub password: String,
}

/// Response for successful authentication
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Request body for profile edits. Absent fields stay unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    /// `null` clears the picture
    #[serde(default, deserialize_with = "deserialize_some")]
    pub profile_picture: Option<Option<String>>,
}

/// Tell "field absent" apart from "field set to null"
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register/", post(register))
        .route("/login/", post(login))
        .route("/token/", post(obtain_token))
        .route("/logout/", post(logout))
        .route(
            "/profile/",
            get(get_profile).put(update_profile).patch(update_profile),
        )
        .route("/permissions/", get(permissions))
}

fn cookie_headers(cookie: &str) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(cookie).map_err(ApiError::internal)?,
    );
    Ok(headers)
}

/// POST /api/v1/register/
async fn register(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let input = RegisterInput {
        username: body.username,
        email: body.email,
        password: body.password,
        password2: body.password2,
        first_name: body.first_name,
        last_name: body.last_name,
    };
    let registration = state.user_service.register(input).await?;
    let headers = cookie_headers(&state.session_cookie(&registration.session.id))?;

    Ok((
        StatusCode::CREATED,
        headers,
        Json(RegisterResponse {
            user_id: registration.user.id,
            username: registration.user.username,
            token: registration.session.id,
        }),
    ))
}

/// POST /api/v1/login/
async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ApiJson(body): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (session, user) = state
        .user_service
        .login(LoginInput::new(body.username, body.password), ip)
        .await?;
    let headers = cookie_headers(&state.session_cookie(&session.id))?;

    Ok((
        headers,
        Json(AuthResponse {
            token: session.id,
            user: user.into(),
        }),
    ))
}

/// POST /api/v1/token/
async fn obtain_token(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ApiJson(body): ApiJson<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let (session, _user) = state
        .user_service
        .login(LoginInput::new(body.username, body.password), ip)
        .await?;
    Ok(Json(TokenResponse { token: session.id }))
}

/// POST /api/v1/logout/
async fn logout(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    state.user_service.logout(&auth.token).await?;
    tracing::info!(user_id = auth.user.id, "User logged out");

    let headers = cookie_headers("session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")?;
    Ok((StatusCode::NO_CONTENT, headers))
}

/// GET /api/v1/profile/
async fn get_profile(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
) -> Result<Json<ProfileResponse>, ApiError> {
    let owner_id = Some(auth.user.id);
    state.authorize(Some(&auth), Action::View, Resource::Profile { owner_id })?;

    let (user, profile) = state.user_service.get_profile(auth.user.id).await?;
    Ok(Json(ProfileResponse::new(user, profile)))
}

/// PUT|PATCH /api/v1/profile/
async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(auth): CurrentUser,
    ApiJson(body): ApiJson<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let owner_id = Some(auth.user.id);
    state.authorize(Some(&auth), Action::Update, Resource::Profile { owner_id })?;

    let changes = ProfileChanges {
        email: body.email,
        first_name: body.first_name,
        last_name: body.last_name,
        bio: body.bio,
        profile_picture: body.profile_picture,
    };
    let (user, profile) = state.user_service.update_profile(auth.user.id, changes).await?;
    Ok(Json(ProfileResponse::new(user, profile)))
}

/// GET /api/v1/permissions/
async fn permissions(CurrentUser(auth): CurrentUser) -> Json<PermissionsResponse> {
    Json(auth.principal.into())
}
