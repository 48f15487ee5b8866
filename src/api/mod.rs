//! API layer - HTTP handlers and routing
//!
//! Every endpoint lives under `/api/v1`:
//! - auth: register, login, token, logout, profile, permissions
//! - catalog: books, authors and libraries
//! - blog: posts, comments and tags
//! - social: public profiles, follow graph and role assignment

pub mod auth;
pub mod authors;
pub mod books;
pub mod comments;
pub mod common;
pub mod extract;
pub mod libraries;
pub mod middleware;
pub mod posts;
pub mod responses;
pub mod security;
pub mod tags;
pub mod users;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use extract::{ApiJson, ApiPath, ApiQuery};
pub use middleware::{ApiError, AppState, AuthContext, CurrentUser, MaybeUser};

/// Build the `/api/v1` routes
pub fn build_api_router() -> Router<AppState> {
    Router::new()
        .merge(auth::router())
        .merge(books::router())
        .merge(authors::router())
        .merge(libraries::router())
        .merge(posts::router())
        .merge(comments::router())
        .merge(tags::router())
        .merge(users::router())
}

fn cors_layer(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE])
        .allow_credentials(true);

    match origin.parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            tracing::warn!("Invalid CORS origin '{}', cross-origin requests disabled", origin);
            cors
        }
    }
}

/// Build the complete router with middleware
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origin);

    Router::new()
        .nest("/api/v1", build_api_router())
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::authenticate,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        // Outermost, so error responses get the headers too
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            security::security_middleware,
        ))
        .with_state(state)
}
