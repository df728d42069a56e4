use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{Account, AccountDraft, AccountRow};

/// Column carrying a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Email,
    UserName,
}

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("duplicate key on {0:?}")]
    DuplicateKey(UniqueField),
    #[error("database error: {0:#}")]
    Database(#[from] anyhow::Error),
}

/// System of record for accounts.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, RepoError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, RepoError>;
    async fn find_by_user_name(&self, user_name: &str) -> Result<Option<Account>, RepoError>;

    /// Open a transaction. Dropping it without `commit` discards its writes.
    async fn begin(&self) -> Result<Box<dyn AccountTx>, RepoError>;

    /// Persist a full record outside any caller transaction.
    async fn save(&self, account: &Account) -> Result<(), RepoError> {
        let mut tx = self.begin().await?;
        match tx.save(account).await {
            Ok(()) => tx.commit().await,
            Err(e) => {
                if let Err(abort_err) = tx.abort().await {
                    tracing::warn!(account_id = %account.id, error = %abort_err, "transaction abort failed");
                }
                Err(e)
            }
        }
    }
}

/// Reads and writes scoped to one transaction; writes become visible to
/// other readers only after `commit`.
#[async_trait]
pub trait AccountTx: Send {
    async fn find_by_id(&mut self, id: Uuid) -> Result<Option<Account>, RepoError>;
    async fn find_by_email(&mut self, email: &str) -> Result<Option<Account>, RepoError>;
    async fn find_by_user_name(&mut self, user_name: &str) -> Result<Option<Account>, RepoError>;
    async fn find_by_reset_token(&mut self, hashed: &str) -> Result<Option<Account>, RepoError>;

    /// Fails with `DuplicateKey` when email or userName is taken, even if a
    /// pre-check in the same transaction saw no conflict.
    async fn create(&mut self, draft: &AccountDraft) -> Result<Account, RepoError>;
    async fn save(&mut self, account: &Account) -> Result<(), RepoError>;

    async fn commit(self: Box<Self>) -> Result<(), RepoError>;
    async fn abort(self: Box<Self>) -> Result<(), RepoError>;
}

const ACCOUNT_COLUMNS: &str = "id, user_name, email, password_hash, avatar_media_id, avatar_url, \
     reset_token, reset_token_expiry, created_at, updated_at";

pub(crate) fn unique_violation(err: &sqlx::Error) -> Option<UniqueField> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    if db_err.code().as_deref() != Some("23505") {
        return None;
    }
    match db_err.constraint() {
        Some("accounts_email_key") => Some(UniqueField::Email),
        Some("accounts_user_name_key") => Some(UniqueField::UserName),
        _ => None,
    }
}

fn map_write_err(err: sqlx::Error, what: &'static str) -> RepoError {
    match unique_violation(&err) {
        Some(field) => RepoError::DuplicateKey(field),
        None => RepoError::Database(anyhow::Error::new(err).context(what)),
    }
}

#[derive(Clone)]
pub struct PgAccountRepository {
    db: PgPool,
}

impl PgAccountRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn find_where(&self, column: &str, value: &str) -> Result<Option<Account>, RepoError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {column} = $1");
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("find account by {column}"))?;
        Ok(row.map(Account::from))
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, RepoError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find account by id")?;
        Ok(row.map(Account::from))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, RepoError> {
        self.find_where("email", email).await
    }

    async fn find_by_user_name(&self, user_name: &str) -> Result<Option<Account>, RepoError> {
        self.find_where("user_name", user_name).await
    }

    async fn begin(&self) -> Result<Box<dyn AccountTx>, RepoError> {
        let tx = self.db.begin().await.context("begin tx")?;
        Ok(Box::new(PgAccountTx { tx }))
    }
}

pub struct PgAccountTx {
    tx: Transaction<'static, Postgres>,
}

impl PgAccountTx {
    async fn find_where(
        &mut self,
        column: &str,
        value: &str,
        lock: bool,
    ) -> Result<Option<Account>, RepoError> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {column} = $1{}",
            if lock { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(value)
            .fetch_optional(&mut *self.tx)
            .await
            .with_context(|| format!("find account by {column} in tx"))?;
        Ok(row.map(Account::from))
    }
}

#[async_trait]
impl AccountTx for PgAccountTx {
    async fn find_by_id(&mut self, id: Uuid) -> Result<Option<Account>, RepoError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .context("find account by id in tx")?;
        Ok(row.map(Account::from))
    }

    async fn find_by_email(&mut self, email: &str) -> Result<Option<Account>, RepoError> {
        self.find_where("email", email, true).await
    }

    async fn find_by_user_name(&mut self, user_name: &str) -> Result<Option<Account>, RepoError> {
        self.find_where("user_name", user_name, false).await
    }

    async fn find_by_reset_token(&mut self, hashed: &str) -> Result<Option<Account>, RepoError> {
        self.find_where("reset_token", hashed, true).await
    }

    async fn create(&mut self, draft: &AccountDraft) -> Result<Account, RepoError> {
        let sql = format!(
            r#"
            INSERT INTO accounts (id, user_name, email, password_hash, avatar_media_id, avatar_url)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&draft.user_name)
            .bind(&draft.email)
            .bind(&draft.password_hash)
            .bind(&draft.avatar.media_id)
            .bind(&draft.avatar.url)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_write_err(e, "insert account"))?;
        Ok(row.into())
    }

    async fn save(&mut self, account: &Account) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            UPDATE accounts
               SET user_name = $2,
                   email = $3,
                   password_hash = $4,
                   avatar_media_id = $5,
                   avatar_url = $6,
                   reset_token = $7,
                   reset_token_expiry = $8,
                   updated_at = $9
             WHERE id = $1
            "#,
        )
        .bind(account.id)
        .bind(&account.user_name)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(&account.avatar.media_id)
        .bind(&account.avatar.url)
        .bind(&account.reset_token)
        .bind(account.reset_token_expiry)
        .bind(OffsetDateTime::now_utc())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_err(e, "update account"))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_write_err(e, "commit tx"))
    }

    async fn abort(self: Box<Self>) -> Result<(), RepoError> {
        self.tx.rollback().await.context("rollback tx")?;
        Ok(())
    }
}
