use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use super::repo::{RepoError, UniqueField};

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("{0}")]
    Validation(String),
    #[error("Email already exists")]
    DuplicateEmail,
    #[error("User name already exists")]
    DuplicateUserName,
    #[error("Password and confirm password don't match")]
    PasswordMismatch,
    #[error("New password must differ from the old one")]
    NoOpChange,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Incorrect password")]
    IncorrectPassword,
    #[error("Account not found")]
    NotFound,
    #[error("Reset token is invalid or has expired")]
    InvalidOrExpiredToken,
    #[error("Avatar upload failed: {0}")]
    UploadFailed(String),
    #[error("Notification could not be delivered: {0}")]
    NotificationFailed(String),
    #[error("transaction failed: {0:#}")]
    TransactionFailed(anyhow::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AccountError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::DuplicateEmail
            | Self::DuplicateUserName
            | Self::PasswordMismatch
            | Self::NoOpChange
            | Self::UploadFailed(_)
            | Self::InvalidOrExpiredToken => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials | Self::IncorrectPassword => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::NotificationFailed(_) | Self::TransactionFailed(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<RepoError> for AccountError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::DuplicateKey(UniqueField::Email) => Self::DuplicateEmail,
            RepoError::DuplicateKey(UniqueField::UserName) => Self::DuplicateUserName,
            RepoError::Database(e) => Self::TransactionFailed(e),
        }
    }
}

impl IntoResponse for AccountError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!(error = %self, "account operation failed");
            "Something went wrong, please try again later".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}
