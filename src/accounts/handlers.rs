use std::{collections::HashMap, future::Future};

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header::SET_COOKIE, HeaderMap},
    routing::{get, post, put},
    Json, Router,
};
use bytes::Bytes;
use tracing::{info, instrument};

use super::{
    dto::{
        ApiResponse, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, RegisterForm,
        ResetPasswordRequest, UpdateProfileForm,
    },
    error::AccountError,
    extractors::{clear_session_cookie, session_cookie, AuthAccount},
    repo_types::PublicAccount,
    services,
};
use crate::{media::AvatarUpload, state::AppState};

/// Room for one avatar image plus the text fields.
const FORM_BODY_LIMIT: usize = 5 * 1024 * 1024;

const RESET_REQUESTED: &str = "If that email is registered, a reset link has been sent to it";

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/users/register", post(register))
        .route("/users/login", post(login))
        .route("/users/logout", get(logout))
        .route("/users/me", get(get_profile))
        .route("/users/forgot-password", post(forgot_password))
        .route("/users/reset-password/:token", post(reset_password))
        .route("/users/change-password", post(change_password))
        .route("/users/update", put(update_profile))
        .layer(DefaultBodyLimit::max(FORM_BODY_LIMIT))
}

type AccountReply = (HeaderMap, Json<ApiResponse<PublicAccount>>);

/// Run a lifecycle call on its own task so a dropped connection cannot cancel
/// it halfway through a transaction.
async fn detached<T, F>(fut: F) -> Result<T, AccountError>
where
    F: Future<Output = Result<T, AccountError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(fut)
        .await
        .context("account operation task")?
}

fn cookie_headers(state: &AppState, token: &str) -> Result<HeaderMap, AccountError> {
    let cookie = session_cookie(&state.config.cookie, token).map_err(anyhow::Error::from)?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);
    Ok(headers)
}

#[derive(Default)]
struct FormFields {
    text: HashMap<String, String>,
    avatar: Option<AvatarUpload>,
}

impl FormFields {
    fn take(&mut self, name: &str) -> Option<String> {
        self.text.remove(name)
    }
}

fn malformed(e: axum::extract::multipart::MultipartError) -> AccountError {
    AccountError::validation(format!("Malformed form data: {e}"))
}

/// Collect text fields and park the `avatar` file in a temp file.
async fn read_form(mut mp: Multipart) -> Result<FormFields, AccountError> {
    let mut out = FormFields::default();
    while let Some(field) = mp.next_field().await.map_err(malformed)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == "avatar" {
            let data = field.bytes().await.map_err(malformed)?;
            if !data.is_empty() {
                out.avatar = Some(park_avatar(data).await?);
            }
        } else {
            let value = field.text().await.map_err(malformed)?;
            out.text.insert(name, value);
        }
    }
    Ok(out)
}

async fn park_avatar(data: Bytes) -> Result<AvatarUpload, AccountError> {
    let file = tempfile::Builder::new()
        .prefix("avatar-")
        .tempfile()
        .context("create avatar temp file")?;
    let path = file.into_temp_path();
    tokio::fs::write(&path, &data)
        .await
        .context("write avatar temp file")?;
    Ok(AvatarUpload::new(path))
}

#[instrument(skip(state, mp))]
pub async fn register(
    State(state): State<AppState>,
    mp: Multipart,
) -> Result<AccountReply, AccountError> {
    let mut fields = read_form(mp).await?;
    let form = RegisterForm {
        user_name: fields.take("userName").unwrap_or_default(),
        email: fields.take("email").unwrap_or_default(),
        password: fields.take("password").unwrap_or_default(),
        confirm_password: fields.take("confirmPassword").unwrap_or_default(),
        avatar: fields.avatar.take(),
    };

    let st = state.clone();
    let outcome = detached(async move { services::register(&st, form).await }).await?;

    Ok((
        cookie_headers(&state, &outcome.token)?,
        Json(ApiResponse::with_data("User registered successfully", outcome.account)),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<AccountReply, AccountError> {
    let outcome = services::login(&state, payload).await?;
    Ok((
        cookie_headers(&state, &outcome.token)?,
        Json(ApiResponse::with_data("User logged in successfully", outcome.account)),
    ))
}

/// Always succeeds, with or without a live session.
#[instrument(skip(state, session))]
pub async fn logout(
    State(state): State<AppState>,
    session: Option<AuthAccount>,
) -> (HeaderMap, Json<ApiResponse<()>>) {
    if let Some(AuthAccount(claims)) = session {
        info!(account_id = %claims.sub, "account logged out");
    }
    let mut headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(&state.config.cookie) {
        headers.insert(SET_COOKIE, cookie);
    }
    (headers, Json(ApiResponse::message("User logged out successfully")))
}

#[instrument(skip(state, claims))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthAccount(claims): AuthAccount,
) -> Result<Json<ApiResponse<PublicAccount>>, AccountError> {
    let account = services::get_profile(&state, claims.sub).await?;
    Ok(Json(ApiResponse::with_data("User found", account)))
}

/// Unknown emails get the same answer as known ones.
#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<ApiResponse<()>>, AccountError> {
    let st = state.clone();
    match detached(async move { services::forgot_password(&st, payload).await }).await {
        Ok(()) | Err(AccountError::NotFound) => Ok(Json(ApiResponse::message(RESET_REQUESTED))),
        Err(e) => Err(e),
    }
}

#[instrument(skip(state, token, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<ApiResponse<()>>, AccountError> {
    let st = state.clone();
    detached(async move { services::reset_password(&st, &token, payload).await }).await?;
    Ok(Json(ApiResponse::message("Password reset successfully")))
}

#[instrument(skip(state, claims, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthAccount(claims): AuthAccount,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<()>>, AccountError> {
    let st = state.clone();
    detached(async move { services::change_password(&st, claims.sub, payload).await }).await?;
    Ok(Json(ApiResponse::message("Password changed successfully")))
}

#[instrument(skip(state, claims, mp))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthAccount(claims): AuthAccount,
    mp: Multipart,
) -> Result<AccountReply, AccountError> {
    let mut fields = read_form(mp).await?;
    let form = UpdateProfileForm {
        user_name: fields.take("userName"),
        avatar: fields.avatar.take(),
    };

    let st = state.clone();
    let outcome =
        detached(async move { services::update_profile(&st, claims.sub, form).await }).await?;

    Ok((
        cookie_headers(&state, &outcome.token)?,
        Json(ApiResponse::with_data("Profile updated successfully", outcome.account)),
    ))
}
