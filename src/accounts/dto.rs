use serde::{Deserialize, Serialize};

use super::repo_types::PublicAccount;
use crate::media::AvatarUpload;

/// Registration form, parsed from multipart.
#[derive(Default)]
pub struct RegisterForm {
    pub user_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub avatar: Option<AvatarUpload>,
}

/// Profile update form, parsed from multipart. Absent fields stay unchanged.
#[derive(Default)]
pub struct UpdateProfileForm {
    pub user_name: Option<String>,
    pub avatar: Option<AvatarUpload>,
}

/// Request body for login.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for a password reset link.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// Request body for completing a reset; the token travels in the path.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResetPasswordRequest {
    pub password: String,
}

/// Request body for changing the password of the signed-in account.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

/// Result of register, login and profile update: the public account plus a
/// fresh session token for the cookie.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub account: PublicAccount,
    pub token: String,
}

/// Envelope for every successful response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn with_data(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }
}
