use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{
        header::{InvalidHeaderValue, AUTHORIZATION, COOKIE},
        request::Parts,
        HeaderMap, HeaderValue, StatusCode,
    },
    Json,
};
use serde_json::{json, Value};
use tracing::warn;

use super::tokens::{SessionClaims, SessionKeys};
use crate::config::CookieConfig;

pub const SESSION_COOKIE: &str = "token";

/// Verified session of the calling account.
pub struct AuthAccount(pub SessionClaims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthAccount
where
    S: Send + Sync,
    SessionKeys: FromRef<S>,
{
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = SessionKeys::from_ref(state);
        let token = session_token(&parts.headers).ok_or_else(|| unauthenticated("Unauthenticated"))?;

        let claims = keys.verify_session(&token).map_err(|e| {
            warn!(error = %e, "invalid or expired session");
            unauthenticated("Invalid or expired session")
        })?;
        Ok(AuthAccount(claims))
    }
}

fn unauthenticated(message: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "success": false, "message": message })),
    )
}

/// Session token from the cookie, falling back to `Authorization: Bearer`.
pub(crate) fn session_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim() == SESSION_COOKIE)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty());
    if from_cookie.is_some() {
        return from_cookie;
    }

    let auth = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = auth
        .strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

pub(crate) fn session_cookie(cfg: &CookieConfig, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = cfg.max_age_days * 24 * 60 * 60;
    let mut cookie = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if cfg.secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_session_cookie(cfg: &CookieConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if cfg.secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}
