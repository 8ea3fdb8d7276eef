use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::auth::{
    dto::ValidationError, notify::DeliveryError, password::HashingError, tokens::TokenError,
};

/// Every way an identity operation can fail.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("User already exists!")]
    AlreadyExists,
    #[error("Invalid or expired token!")]
    InvalidOrExpiredToken,
    #[error("Invalid credentials!")]
    InvalidCredentials,
    #[error("Email address is not verified!")]
    NotVerified,
    #[error("User not found!")]
    NotFound,
    #[error("notification delivery failed: {0}")]
    Notification(#[from] DeliveryError),
    #[error("password hashing failed: {0}")]
    Hashing(#[from] HashingError),
    #[error("Invalid or expired session!")]
    InvalidSession,
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl From<ValidationError> for AuthError {
    fn from(e: ValidationError) -> Self {
        AuthError::Validation(e.0)
    }
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Invalid(_) => AuthError::InvalidSession,
            TokenError::Sign(_) => AuthError::Internal(anyhow::Error::new(e)),
        }
    }
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation(_)
            | AuthError::AlreadyExists
            | AuthError::InvalidOrExpiredToken
            | AuthError::InvalidCredentials
            | AuthError::NotFound => StatusCode::BAD_REQUEST,
            AuthError::NotVerified => StatusCode::FORBIDDEN,
            AuthError::InvalidSession => StatusCode::UNAUTHORIZED,
            AuthError::Notification(_) => StatusCode::BAD_GATEWAY,
            AuthError::Hashing(_) | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show a client. Infrastructure detail stays in the logs.
    pub fn public_message(&self) -> serde_json::Value {
        match self {
            AuthError::Validation(msgs) => json!(msgs),
            AuthError::Notification(_) => json!("Email could not be sent. Please try again later."),
            AuthError::Hashing(_) | AuthError::Internal(_) => {
                json!("An internal server error occurred.")
            }
            other => json!(other.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() || status == StatusCode::BAD_GATEWAY {
            error!(error = %self, %status, "request failed");
        }
        let body = json!({
            "success": false,
            "message": self.public_message(),
            "data": {},
        });
        (status, Json(body)).into_response()
    }
}
