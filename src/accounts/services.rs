//! Account lifecycle: register, login, profile, password reset/change and
//! profile update.
//!
//! Every operation that writes opens one repository transaction and either
//! commits it or aborts it before returning. The media store cannot join
//! that transaction: an avatar uploaded before a later step fails is deleted
//! best-effort, and if that delete fails too the object is left behind and
//! logged with its media id for a periodic sweep.

use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{
        AuthOutcome, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, RegisterForm,
        ResetPasswordRequest, UpdateProfileForm,
    },
    error::AccountError,
    repo::AccountTx,
    repo_types::{Account, AccountDraft, PublicAccount},
    tokens::{hash_reset_token, issue_reset_token},
};
use crate::{
    media::{Avatar, AvatarUpload},
    notify::reset_password_notification,
    state::AppState,
};

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn check_password_strength(password: &str) -> Result<(), AccountError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AccountError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Commit on success, abort on failure. A transaction never outlives the call.
async fn finish<T>(
    tx: Box<dyn AccountTx>,
    result: Result<T, AccountError>,
) -> Result<T, AccountError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(abort_err) = tx.abort().await {
                warn!(error = %abort_err, "transaction abort failed");
            }
            Err(e)
        }
    }
}

/// Remove an avatar the account record never came to reference.
async fn discard_upload(st: &AppState, avatar: &Avatar) {
    if let Err(e) = st.media.delete(&avatar.media_id).await {
        warn!(media_id = %avatar.media_id, error = %e, "orphaned avatar left in media store");
    }
}

async fn upload_avatar(st: &AppState, upload: AvatarUpload) -> Result<Avatar, AccountError> {
    st.media.upload(upload).await.map_err(|e| {
        warn!(error = %e, "avatar upload failed");
        AccountError::UploadFailed(e.to_string())
    })
}

fn issue_session(st: &AppState, account: &Account) -> Result<AuthOutcome, AccountError> {
    let token = st
        .keys
        .issue_session(account)
        .map_err(anyhow::Error::from)?;
    Ok(AuthOutcome {
        account: PublicAccount::from(account),
        token,
    })
}

#[instrument(skip(st, form))]
pub async fn register(st: &AppState, form: RegisterForm) -> Result<AuthOutcome, AccountError> {
    let RegisterForm {
        user_name,
        email,
        password,
        confirm_password,
        avatar,
    } = form;
    let user_name = user_name.trim().to_string();
    let email = normalize_email(&email);

    if user_name.is_empty() || email.is_empty() || password.is_empty() || confirm_password.is_empty()
    {
        return Err(AccountError::validation("All fields are mandatory"));
    }
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AccountError::validation("Invalid email"));
    }
    check_password_strength(&password)?;

    let mut tx = st.accounts.begin().await?;
    let mut uploaded = None;
    let result = register_in_tx(
        st,
        tx.as_mut(),
        &user_name,
        &email,
        &password,
        &confirm_password,
        avatar,
        &mut uploaded,
    )
    .await;
    let outcome = finish(tx, result).await;

    match &outcome {
        Ok(out) => info!(account_id = %out.account.id, email = %email, "account registered"),
        Err(e) => {
            warn!(email = %email, error = %e, "registration rolled back");
            if let Some(avatar) = uploaded {
                discard_upload(st, &avatar).await;
            }
        }
    }
    outcome
}

#[allow(clippy::too_many_arguments)]
async fn register_in_tx(
    st: &AppState,
    tx: &mut dyn AccountTx,
    user_name: &str,
    email: &str,
    password: &str,
    confirm_password: &str,
    avatar_file: Option<AvatarUpload>,
    uploaded: &mut Option<Avatar>,
) -> Result<AuthOutcome, AccountError> {
    if tx.find_by_email(email).await?.is_some() {
        return Err(AccountError::DuplicateEmail);
    }
    if tx.find_by_user_name(user_name).await?.is_some() {
        return Err(AccountError::DuplicateUserName);
    }
    if password != confirm_password {
        return Err(AccountError::PasswordMismatch);
    }

    let mut avatar = Avatar::placeholder(email);
    if let Some(file) = avatar_file {
        let stored = upload_avatar(st, file).await?;
        *uploaded = Some(stored.clone());
        avatar = stored;
    }

    let password_hash = st.hasher.hash_blocking(password).await?;
    let account = tx
        .create(&AccountDraft {
            user_name: user_name.to_string(),
            email: email.to_string(),
            password_hash,
            avatar,
        })
        .await?;

    issue_session(st, &account)
}

/// Unknown email and wrong password fail identically.
#[instrument(skip(st, req))]
pub async fn login(st: &AppState, req: LoginRequest) -> Result<AuthOutcome, AccountError> {
    let email = normalize_email(&req.email);
    if email.is_empty() || req.password.is_empty() {
        return Err(AccountError::validation("All fields are required"));
    }

    let Some(account) = st.accounts.find_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AccountError::InvalidCredentials);
    };
    if !st
        .hasher
        .verify_blocking(&req.password, &account.password_hash)
        .await?
    {
        warn!(email = %email, account_id = %account.id, "login invalid password");
        return Err(AccountError::InvalidCredentials);
    }

    let outcome = issue_session(st, &account)?;
    info!(account_id = %account.id, email = %email, "account logged in");
    Ok(outcome)
}

#[instrument(skip(st))]
pub async fn get_profile(st: &AppState, account_id: Uuid) -> Result<PublicAccount, AccountError> {
    st.accounts
        .find_by_id(account_id)
        .await?
        .map(|a| PublicAccount::from(&a))
        .ok_or(AccountError::NotFound)
}

/// Store a fresh reset token and send the link. The token is only committed
/// once the notification has gone out; a failed delivery rolls it back.
#[instrument(skip(st, req))]
pub async fn forgot_password(st: &AppState, req: ForgotPasswordRequest) -> Result<(), AccountError> {
    let email = normalize_email(&req.email);
    if email.is_empty() {
        return Err(AccountError::validation("Email is required"));
    }

    let mut tx = st.accounts.begin().await?;
    let result = forgot_password_in_tx(st, tx.as_mut(), &email).await;
    let outcome = finish(tx, result).await;
    match &outcome {
        Ok(()) => info!(email = %email, "password reset requested"),
        Err(e) => warn!(email = %email, error = %e, "password reset request failed"),
    }
    outcome
}

async fn forgot_password_in_tx(
    st: &AppState,
    tx: &mut dyn AccountTx,
    email: &str,
) -> Result<(), AccountError> {
    let Some(mut account) = tx.find_by_email(email).await? else {
        return Err(AccountError::NotFound);
    };

    let reset = issue_reset_token()?;
    let expiry = OffsetDateTime::now_utc() + Duration::minutes(st.config.reset.ttl_minutes);
    account.set_reset_token(reset.hashed, expiry);
    tx.save(&account).await?;

    let message = reset_password_notification(email, &st.config.reset.frontend_url, &reset.plain);
    let deadline = std::time::Duration::from_secs(st.config.reset.notify_timeout_secs);
    match tokio::time::timeout(deadline, st.notifier.send(&message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(AccountError::NotificationFailed(format!("{e:#}"))),
        Err(_) => Err(AccountError::NotificationFailed(
            "delivery deadline exceeded".into(),
        )),
    }
}

/// Consume a reset token. Success clears the token whatever else changes.
#[instrument(skip(st, plain_token, req))]
pub async fn reset_password(
    st: &AppState,
    plain_token: &str,
    req: ResetPasswordRequest,
) -> Result<(), AccountError> {
    if plain_token.trim().is_empty() {
        return Err(AccountError::InvalidOrExpiredToken);
    }
    if req.password.is_empty() {
        return Err(AccountError::validation("Password is required"));
    }
    check_password_strength(&req.password)?;

    let hashed = hash_reset_token(plain_token.trim());
    let mut tx = st.accounts.begin().await?;
    let result = reset_password_in_tx(st, tx.as_mut(), &hashed, &req.password).await;
    let outcome = finish(tx, result).await;
    match &outcome {
        Ok(id) => info!(account_id = %id, "password reset"),
        Err(e) => warn!(error = %e, "password reset rejected"),
    }
    outcome.map(|_| ())
}

async fn reset_password_in_tx(
    st: &AppState,
    tx: &mut dyn AccountTx,
    hashed: &str,
    new_password: &str,
) -> Result<Uuid, AccountError> {
    let Some(mut account) = tx.find_by_reset_token(hashed).await? else {
        return Err(AccountError::InvalidOrExpiredToken);
    };
    if !account.reset_token_valid_at(OffsetDateTime::now_utc()) {
        return Err(AccountError::InvalidOrExpiredToken);
    }

    account.password_hash = st.hasher.hash_blocking(new_password).await?;
    account.clear_reset_token();
    tx.save(&account).await?;
    Ok(account.id)
}

#[instrument(skip(st, req))]
pub async fn change_password(
    st: &AppState,
    account_id: Uuid,
    req: ChangePasswordRequest,
) -> Result<(), AccountError> {
    let ChangePasswordRequest {
        old_password,
        new_password,
        confirm_password,
    } = req;
    if old_password.is_empty() || new_password.is_empty() || confirm_password.is_empty() {
        return Err(AccountError::validation("All fields are mandatory"));
    }
    if new_password != confirm_password {
        return Err(AccountError::PasswordMismatch);
    }
    if old_password == new_password {
        return Err(AccountError::NoOpChange);
    }
    check_password_strength(&new_password)?;

    let mut tx = st.accounts.begin().await?;
    let result = change_password_in_tx(st, tx.as_mut(), account_id, &old_password, &new_password).await;
    let outcome = finish(tx, result).await;
    match &outcome {
        Ok(()) => info!(account_id = %account_id, "password changed"),
        Err(e) => warn!(account_id = %account_id, error = %e, "password change rejected"),
    }
    outcome
}

async fn change_password_in_tx(
    st: &AppState,
    tx: &mut dyn AccountTx,
    account_id: Uuid,
    old_password: &str,
    new_password: &str,
) -> Result<(), AccountError> {
    let Some(mut account) = tx.find_by_id(account_id).await? else {
        return Err(AccountError::NotFound);
    };
    if !st
        .hasher
        .verify_blocking(old_password, &account.password_hash)
        .await?
    {
        return Err(AccountError::IncorrectPassword);
    }

    account.password_hash = st.hasher.hash_blocking(new_password).await?;
    tx.save(&account).await?;
    Ok(())
}

/// Rename and/or replace the avatar. The new avatar is stored before the
/// record changes; the old one is removed only after commit, best-effort.
#[instrument(skip(st, form))]
pub async fn update_profile(
    st: &AppState,
    account_id: Uuid,
    form: UpdateProfileForm,
) -> Result<AuthOutcome, AccountError> {
    let UpdateProfileForm { user_name, avatar } = form;
    let user_name = user_name.map(|n| n.trim().to_string());
    if user_name.as_deref() == Some("") {
        return Err(AccountError::validation("User name cannot be empty"));
    }

    let mut tx = st.accounts.begin().await?;
    let mut uploaded = None;
    let result =
        update_profile_in_tx(st, tx.as_mut(), account_id, user_name, avatar, &mut uploaded).await;
    let outcome = finish(tx, result).await;

    match outcome {
        Ok((out, replaced)) => {
            if let Some(old) = replaced.filter(|a| !a.is_placeholder()) {
                if let Err(e) = st.media.delete(&old.media_id).await {
                    warn!(media_id = %old.media_id, error = %e, "stale avatar left in media store");
                }
            }
            info!(account_id = %account_id, "profile updated");
            Ok(out)
        }
        Err(e) => {
            warn!(account_id = %account_id, error = %e, "profile update rolled back");
            if let Some(avatar) = uploaded {
                discard_upload(st, &avatar).await;
            }
            Err(e)
        }
    }
}

async fn update_profile_in_tx(
    st: &AppState,
    tx: &mut dyn AccountTx,
    account_id: Uuid,
    user_name: Option<String>,
    avatar_file: Option<AvatarUpload>,
    uploaded: &mut Option<Avatar>,
) -> Result<(AuthOutcome, Option<Avatar>), AccountError> {
    let Some(mut account) = tx.find_by_id(account_id).await? else {
        return Err(AccountError::NotFound);
    };

    if let Some(name) = user_name.filter(|n| *n != account.user_name) {
        if tx.find_by_user_name(&name).await?.is_some() {
            return Err(AccountError::DuplicateUserName);
        }
        account.user_name = name;
    }

    let mut replaced = None;
    if let Some(file) = avatar_file {
        let stored = upload_avatar(st, file).await?;
        *uploaded = Some(stored.clone());
        replaced = Some(std::mem::replace(&mut account.avatar, stored));
    }

    tx.save(&account).await?;
    let account = tx
        .find_by_id(account_id)
        .await?
        .ok_or(AccountError::NotFound)?;
    Ok((issue_session(st, &account)?, replaced))
}
