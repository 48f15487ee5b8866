//! Request extractors that answer malformed input with [`ApiError`]
//!
//! `ApiJson`, `ApiQuery` and `ApiPath` wrap the axum extractors of the same
//! name. A body, query string or path segment that fails to deserialize is
//! a 400 `VALIDATION_ERROR`, keyed by the offending field when the
//! deserializer names one.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts, Path, Query, Request,
    },
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;

use crate::api::middleware::ApiError;
use crate::services::{FieldErrors, NON_FIELD_ERRORS};

/// JSON request body
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

/// Query string
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(ApiQuery(value))
    }
}

/// Path parameters
#[derive(Debug, Clone, Copy)]
pub struct ApiPath<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(ApiPath(value))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let errors = match rejection {
            JsonRejection::JsonDataError(_) => rejection_errors(&rejection.body_text()),
            _ => FieldErrors::single(NON_FIELD_ERRORS, rejection.body_text()),
        };
        ApiError::validation(errors)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::validation(rejection_errors(&rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::validation(FieldErrors::single(NON_FIELD_ERRORS, rejection.body_text()))
    }
}

/// Split a rejection text of the form `<context>: <path>: <message>` into a
/// field error. Without a recognisable path the message is a non-field error.
fn rejection_errors(text: &str) -> FieldErrors {
    let detail = text.split_once(": ").map_or(text, |(_, rest)| rest);
    match detail.split_once(": ") {
        Some((path, message)) if is_field_path(path) => FieldErrors::single(path, message),
        _ => FieldErrors::single(NON_FIELD_ERRORS, detail),
    }
}

fn is_field_path(path: &str) -> bool {
    path != "."
        && !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']'))
}
