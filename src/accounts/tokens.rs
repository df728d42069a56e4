use anyhow::Context;
use axum::extract::FromRef;
use base64::Engine;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::repo_types::Account;
use crate::{config::JwtConfig, state::AppState};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),
    #[error("sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

/// Session JWT payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    pub sub: Uuid,         // account id
    pub user_name: String,
    pub email: String,
    pub avatar: String,    // avatar display URL
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
}

/// Signing material for session tokens, built once from configuration.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl SessionKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::days(cfg.ttl_days),
        }
    }

    pub fn issue_session(&self, account: &Account) -> Result<String, TokenError> {
        let now = OffsetDateTime::now_utc();
        let exp = now + self.ttl;
        let claims = SessionClaims {
            sub: account.id,
            user_name: account.user_name.clone(),
            email: account.email.clone(),
            avatar: account.avatar.url.clone(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding).map_err(TokenError::Signing)?;
        debug!(account_id = %account.id, "session signed");
        Ok(token)
    }

    /// Fails on a bad signature, expiry, wrong issuer/audience or a malformed payload.
    pub fn verify_session(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<SessionClaims>(token, &self.decoding, &validation)
            .map_err(TokenError::InvalidToken)?;
        debug!(account_id = %data.claims.sub, "session verified");
        Ok(data.claims)
    }
}

impl FromRef<AppState> for SessionKeys {
    fn from_ref(state: &AppState) -> Self {
        state.keys.clone()
    }
}

/// A freshly issued password reset token. Only `hashed` is ever persisted.
#[derive(Debug, Clone)]
pub struct ResetToken {
    pub plain: String,
    pub hashed: String,
}

/// 256 random bits, URL-safe so the plain token can sit in a link.
pub fn issue_reset_token() -> anyhow::Result<ResetToken> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate reset token")?;
    let plain = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    let hashed = hash_reset_token(&plain);
    Ok(ResetToken { plain, hashed })
}

pub fn hash_reset_token(plain: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plain.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::media::Avatar;

    fn keys_with(secret: &str, issuer: &str, audience: &str) -> SessionKeys {
        let mut cfg = test_config().jwt;
        cfg.secret = secret.into();
        cfg.issuer = issuer.into();
        cfg.audience = audience.into();
        SessionKeys::from_config(&cfg)
    }

    fn account() -> Account {
        let now = OffsetDateTime::now_utc();
        Account {
            id: Uuid::new_v4(),
            user_name: "ada".into(),
            email: "ada@example.com".into(),
            password_hash: "$argon2id$irrelevant".into(),
            avatar: Avatar::placeholder("ada@example.com"),
            reset_token: None,
            reset_token_expiry: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn session_claims_match_account() {
        let keys = keys_with("dev-secret", "test-issuer", "test-aud");
        let account = account();
        let token = keys.issue_session(&account).expect("sign");
        let claims = keys.verify_session(&token).expect("verify");
        assert_eq!(claims.sub, account.id);
        assert_eq!(claims.user_name, "ada");
        assert_eq!(claims.email, "ada@example.com");
        assert_eq!(claims.avatar, account.avatar.url);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
    }

    #[test]
    fn session_lasts_ten_days() {
        let keys = keys_with("dev-secret", "i", "a");
        let claims = keys
            .verify_session(&keys.issue_session(&account()).unwrap())
            .unwrap();
        assert_eq!(claims.exp - claims.iat, 10 * 24 * 60 * 60);
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let token = keys_with("one", "i", "a").issue_session(&account()).unwrap();
        let err = keys_with("two", "i", "a").verify_session(&token).unwrap_err();
        assert!(matches!(err, TokenError::InvalidToken(_)));
    }

    #[test]
    fn verify_rejects_wrong_issuer_or_audience() {
        let token = keys_with("same", "good-iss", "good-aud")
            .issue_session(&account())
            .unwrap();
        assert!(keys_with("same", "bad-iss", "good-aud").verify_session(&token).is_err());
        assert!(keys_with("same", "good-iss", "bad-aud").verify_session(&token).is_err());
    }

    #[test]
    fn verify_rejects_expired_and_malformed() {
        let mut cfg = test_config().jwt;
        cfg.ttl_days = -1;
        let stale = SessionKeys::from_config(&cfg);
        let token = stale.issue_session(&account()).unwrap();
        assert!(stale.verify_session(&token).is_err());
        assert!(stale.verify_session("not.a.jwt").is_err());
    }

    #[test]
    fn reset_token_is_random_and_stored_hashed() {
        let a = issue_reset_token().unwrap();
        let b = issue_reset_token().unwrap();
        assert_ne!(a.plain, b.plain);
        assert_ne!(a.plain, a.hashed);
        // 32 bytes of entropy, unpadded base64url
        assert_eq!(a.plain.len(), 43);
        assert_eq!(a.hashed.len(), 64);
        assert_eq!(hash_reset_token(&a.plain), a.hashed);
    }
}
