use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use vigil_core::errors::AuthError;
use vigil_store::StoreError;

use crate::cascade::CascadeError;
use crate::coordinator::CoordinatorError;

/// Failure of a REST handler, rendered as `{ "message": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Unauthorized(#[from] AuthError),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(format!("{what} not found")),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        match e {
            CoordinatorError::Store(store) => store.into(),
            not_found => Self::NotFound(not_found.to_string()),
        }
    }
}

impl From<CascadeError> for ApiError {
    fn from(e: CascadeError) -> Self {
        match e {
            CascadeError::NotFound(_) => Self::NotFound(e.to_string()),
            CascadeError::Forbidden { .. } => Self::Forbidden(e.to_string()),
            CascadeError::Store(store) => store.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let message = match &self {
            Self::Unauthorized(auth) => auth.close_reason(),
            other => other.to_string(),
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}
