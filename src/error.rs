//! Service error taxonomy and its HTTP representation.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::{auth::password::HashError, store::StoreError};

/// Wording shared by every credential and token failure.
pub const INVALID_CREDENTIALS: &str = "Invalid credentials";
pub const UNAUTHORIZED: &str = "Unauthorized";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    /// Bad credentials or an unusable bearer token. Carries the public message.
    #[error("{0}")]
    Auth(&'static str),
    #[error("{0}")]
    NotFound(String),
    /// Store or internal failure. `message` is public, `detail` is not.
    #[error("{message}: {detail}")]
    Persistence { message: String, detail: String },
}

impl AuthError {
    pub fn persistence(message: impl Into<String>, detail: impl ToString) -> Self {
        Self::Persistence {
            message: message.into(),
            detail: detail.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Conflict(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Persistence { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Persistence { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            Self::Persistence { detail, .. } => Some(detail.clone()),
            _ => None,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        AuthError::persistence("Server error", e)
    }
}

impl From<HashError> for AuthError {
    fn from(e: HashError) -> Self {
        AuthError::persistence("Server error", e)
    }
}

/// Error response body: `{message, error?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An [`AuthError`] ready to be sent, with diagnostics kept or stripped.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(err: AuthError, expose_detail: bool) -> Self {
        if err.status().is_server_error() {
            error!(error = %err, "request failed");
        }
        Self {
            status: err.status(),
            body: ErrorBody {
                message: err.public_message(),
                error: err.detail().filter(|_| expose_detail),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
