//! HTTP mapping for domain failures.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use quire_core::Error;
use quire_engine::{AutosaveError, ProofreadError};
use serde_json::json;
use tracing::warn;

use crate::auth::AuthError;

#[derive(Debug)]
pub enum ApiError {
    Domain(Error),
    Auth(AuthError),
    Proofread(ProofreadError),
    Autosave(AutosaveError),
    /// A feature that is not configured on this daemon
    Unavailable(&'static str),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Domain(err)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl From<ProofreadError> for ApiError {
    fn from(err: ProofreadError) -> Self {
        ApiError::Proofread(err)
    }
}

impl From<AutosaveError> for ApiError {
    fn from(err: AutosaveError) -> Self {
        ApiError::Autosave(err)
    }
}

fn domain_response(err: Error) -> Response {
    let status = match &err {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::InvalidOrder { .. }
        | Error::InvalidTarget(_)
        | Error::InvalidInput(_)
        | Error::StaleSuggestion { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        Error::InconsistentOrder { .. } => StatusCode::CONFLICT,
        Error::PartialReorderFailure {
            applied,
            attempted,
            failed,
        } => {
            warn!(applied, attempted, "reorder left the book non-dense");
            return (
                StatusCode::CONFLICT,
                Json(json!({
                    "error": err.to_string(),
                    "applied": applied,
                    "attempted": attempted,
                    "failed": failed,
                    "recover": "POST /api/books/{book_id}/chapters/recompact",
                })),
            )
                .into_response();
        }
        Error::StoreFailure(_) => StatusCode::BAD_GATEWAY,
        Error::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(%err, "request failed");
    }
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Domain(err) => domain_response(err),
            ApiError::Auth(err) => err.into_response(),
            ApiError::Proofread(err) => {
                let status = match err {
                    ProofreadError::InvalidSelection { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    _ => {
                        warn!(%err, "proofreading failed");
                        StatusCode::BAD_GATEWAY
                    }
                };
                (status, Json(json!({ "error": err.to_string() }))).into_response()
            }
            ApiError::Autosave(err) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response(),
            ApiError::Unavailable(what) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": format!("{what} is not configured") })),
            )
                .into_response(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
