use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::media::Avatar;

/// Account as stored. Never serialized to clients directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub user_name: String,
    pub email: String,
    pub password_hash: String,
    pub avatar: Avatar,
    /// SHA-256 hex digest of the outstanding reset token.
    pub reset_token: Option<String>,
    pub reset_token_expiry: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Account {
    pub fn set_reset_token(&mut self, hashed: String, expiry: OffsetDateTime) {
        self.reset_token = Some(hashed);
        self.reset_token_expiry = Some(expiry);
    }

    pub fn clear_reset_token(&mut self) {
        self.reset_token = None;
        self.reset_token_expiry = None;
    }

    pub fn reset_token_valid_at(&self, now: OffsetDateTime) -> bool {
        matches!((&self.reset_token, self.reset_token_expiry), (Some(_), Some(exp)) if exp > now)
    }
}

/// Row shape of the `accounts` table.
#[derive(Debug, FromRow)]
pub struct AccountRow {
    pub id: Uuid,
    pub user_name: String,
    pub email: String,
    pub password_hash: String,
    pub avatar_media_id: String,
    pub avatar_url: String,
    pub reset_token: Option<String>,
    pub reset_token_expiry: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl From<AccountRow> for Account {
    fn from(r: AccountRow) -> Self {
        Self {
            id: r.id,
            user_name: r.user_name,
            email: r.email,
            password_hash: r.password_hash,
            avatar: Avatar {
                media_id: r.avatar_media_id,
                url: r.avatar_url,
            },
            reset_token: r.reset_token,
            reset_token_expiry: r.reset_token_expiry,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Fields supplied at registration; id and timestamps are assigned on insert.
#[derive(Debug, Clone)]
pub struct AccountDraft {
    pub user_name: String,
    pub email: String,
    pub password_hash: String,
    pub avatar: Avatar,
}

/// Public part of the account returned to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicAccount {
    pub id: Uuid,
    pub user_name: String,
    pub email: String,
    pub avatar: Avatar,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&Account> for PublicAccount {
    fn from(a: &Account) -> Self {
        Self {
            id: a.id,
            user_name: a.user_name.clone(),
            email: a.email.clone(),
            avatar: a.avatar.clone(),
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}
