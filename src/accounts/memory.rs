//! Process-local account store with the same transactional contract as the
//! Postgres backend: writes are staged per transaction and applied under a
//! single lock on commit, where uniqueness is checked again.
//!
//! Every committed row carries a version. A transaction remembers the
//! version of each row it reads or writes, and its commit fails if any row
//! it writes was committed by someone else in the meantime. This stands in
//! for the row locks Postgres takes with `FOR UPDATE`.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    repo::{AccountRepository, AccountTx, RepoError, UniqueField},
    repo_types::{Account, AccountDraft},
};

struct Row {
    account: Account,
    version: u64,
}

type Rows = HashMap<Uuid, Row>;

fn lock(inner: &Mutex<Rows>) -> Result<MutexGuard<'_, Rows>, RepoError> {
    inner
        .lock()
        .map_err(|_| RepoError::Database(anyhow::anyhow!("account store lock poisoned")))
}

/// Email clashes win over user-name clashes.
fn conflict<'a>(others: impl Iterator<Item = &'a Account>, candidate: &Account) -> Option<UniqueField> {
    let mut found = None;
    for other in others.filter(|o| o.id != candidate.id) {
        if other.email == candidate.email {
            return Some(UniqueField::Email);
        }
        if other.user_name == candidate.user_name {
            found = Some(UniqueField::UserName);
        }
    }
    found
}

#[derive(Clone, Default)]
pub struct InMemoryAccountRepository {
    inner: Arc<Mutex<Rows>>,
}

impl InMemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, pred: impl Fn(&Account) -> bool) -> Result<Option<Account>, RepoError> {
        Ok(lock(&self.inner)?
            .values()
            .map(|row| &row.account)
            .find(|a| pred(a))
            .cloned())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, RepoError> {
        self.find(|a| a.id == id)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, RepoError> {
        self.find(|a| a.email == email)
    }

    async fn find_by_user_name(&self, user_name: &str) -> Result<Option<Account>, RepoError> {
        self.find(|a| a.user_name == user_name)
    }

    async fn begin(&self) -> Result<Box<dyn AccountTx>, RepoError> {
        Ok(Box::new(MemoryTx {
            inner: self.inner.clone(),
            staged: HashMap::new(),
            seen: HashMap::new(),
        }))
    }
}

pub struct MemoryTx {
    inner: Arc<Mutex<Rows>>,
    staged: HashMap<Uuid, Account>,
    /// Committed version of each existing row this transaction touched.
    seen: HashMap<Uuid, u64>,
}

impl MemoryTx {
    /// Search committed records overlaid with this transaction's staged writes.
    fn find(&mut self, pred: impl Fn(&Account) -> bool) -> Result<Option<Account>, RepoError> {
        if let Some(hit) = self.staged.values().find(|a| pred(a)) {
            return Ok(Some(hit.clone()));
        }
        let committed = lock(&self.inner)?;
        let hit = committed
            .values()
            .filter(|row| !self.staged.contains_key(&row.account.id))
            .find(|row| pred(&row.account));
        let Some(row) = hit else {
            return Ok(None);
        };
        self.seen.entry(row.account.id).or_insert(row.version);
        Ok(Some(row.account.clone()))
    }

    fn stage(&mut self, account: Account) -> Result<(), RepoError> {
        {
            let committed = lock(&self.inner)?;
            let visible = committed
                .values()
                .map(|row| &row.account)
                .filter(|a| !self.staged.contains_key(&a.id))
                .chain(self.staged.values());
            if let Some(field) = conflict(visible, &account) {
                return Err(RepoError::DuplicateKey(field));
            }
            if let Some(row) = committed.get(&account.id) {
                self.seen.entry(account.id).or_insert(row.version);
            }
        }
        self.staged.insert(account.id, account);
        Ok(())
    }
}

#[async_trait]
impl AccountTx for MemoryTx {
    async fn find_by_id(&mut self, id: Uuid) -> Result<Option<Account>, RepoError> {
        self.find(|a| a.id == id)
    }

    async fn find_by_email(&mut self, email: &str) -> Result<Option<Account>, RepoError> {
        self.find(|a| a.email == email)
    }

    async fn find_by_user_name(&mut self, user_name: &str) -> Result<Option<Account>, RepoError> {
        self.find(|a| a.user_name == user_name)
    }

    async fn find_by_reset_token(&mut self, hashed: &str) -> Result<Option<Account>, RepoError> {
        self.find(|a| a.reset_token.as_deref() == Some(hashed))
    }

    async fn create(&mut self, draft: &AccountDraft) -> Result<Account, RepoError> {
        let now = OffsetDateTime::now_utc();
        let account = Account {
            id: Uuid::new_v4(),
            user_name: draft.user_name.clone(),
            email: draft.email.clone(),
            password_hash: draft.password_hash.clone(),
            avatar: draft.avatar.clone(),
            reset_token: None,
            reset_token_expiry: None,
            created_at: now,
            updated_at: now,
        };
        self.stage(account.clone())?;
        Ok(account)
    }

    async fn save(&mut self, account: &Account) -> Result<(), RepoError> {
        // Mirrors an UPDATE that matches no row.
        if self.find(|a| a.id == account.id)?.is_none() {
            return Ok(());
        }
        let mut account = account.clone();
        account.updated_at = OffsetDateTime::now_utc();
        self.stage(account)
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        let MemoryTx { inner, staged, seen } = *self;
        let mut committed = lock(&inner)?;

        for id in staged.keys() {
            let current = committed.get(id).map(|row| row.version);
            if let Some(&read) = seen.get(id) {
                if current != Some(read) {
                    return Err(RepoError::Database(anyhow::anyhow!(
                        "account {id} was modified by a concurrent transaction"
                    )));
                }
            }
        }
        for account in staged.values() {
            let others = committed.values().map(|row| &row.account);
            if let Some(field) = conflict(others, account) {
                return Err(RepoError::DuplicateKey(field));
            }
        }

        for (id, account) in staged {
            let version = committed.get(&id).map_or(0, |row| row.version + 1);
            committed.insert(id, Row { account, version });
        }
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<(), RepoError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Avatar;

    fn draft(user_name: &str, email: &str) -> AccountDraft {
        AccountDraft {
            user_name: user_name.into(),
            email: email.into(),
            password_hash: "$argon2id$h".into(),
            avatar: Avatar::placeholder(email),
        }
    }

    #[tokio::test]
    async fn writes_become_visible_on_commit_only() {
        let repo = InMemoryAccountRepository::new();
        let mut tx = repo.begin().await.unwrap();
        let created = tx.create(&draft("ada", "ada@example.com")).await.unwrap();

        assert!(tx.find_by_email("ada@example.com").await.unwrap().is_some());
        assert!(repo.find_by_id(created.id).await.unwrap().is_none());

        tx.commit().await.unwrap();
        assert_eq!(repo.find_by_id(created.id).await.unwrap(), Some(created));
    }

    #[tokio::test]
    async fn abort_and_drop_discard_writes() {
        let repo = InMemoryAccountRepository::new();

        let mut tx = repo.begin().await.unwrap();
        tx.create(&draft("ada", "ada@example.com")).await.unwrap();
        tx.abort().await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        tx.create(&draft("bob", "bob@example.com")).await.unwrap();
        drop(tx);

        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn create_rejects_taken_email_or_user_name() {
        let repo = InMemoryAccountRepository::new();
        let mut tx = repo.begin().await.unwrap();
        tx.create(&draft("ada", "ada@example.com")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        let err = tx.create(&draft("other", "ada@example.com")).await.unwrap_err();
        assert!(matches!(err, RepoError::DuplicateKey(UniqueField::Email)));
        let err = tx.create(&draft("ada", "other@example.com")).await.unwrap_err();
        assert!(matches!(err, RepoError::DuplicateKey(UniqueField::UserName)));
    }

    #[tokio::test]
    async fn racing_transactions_cannot_both_commit() {
        let repo = InMemoryAccountRepository::new();
        let mut first = repo.begin().await.unwrap();
        let mut second = repo.begin().await.unwrap();

        assert!(first.find_by_email("x@example.com").await.unwrap().is_none());
        assert!(second.find_by_email("x@example.com").await.unwrap().is_none());
        first.create(&draft("x1", "x@example.com")).await.unwrap();
        second.create(&draft("x2", "x@example.com")).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, RepoError::DuplicateKey(UniqueField::Email)));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn save_outside_transaction_updates_record() {
        let repo = InMemoryAccountRepository::new();
        let mut tx = repo.begin().await.unwrap();
        let mut account = tx.create(&draft("ada", "ada@example.com")).await.unwrap();
        tx.commit().await.unwrap();

        account.user_name = "lovelace".into();
        repo.save(&account).await.unwrap();

        let stored = repo.find_by_user_name("lovelace").await.unwrap().unwrap();
        assert_eq!(stored.id, account.id);
        assert!(stored.updated_at >= account.created_at);
    }

    #[tokio::test]
    async fn interleaved_reset_transactions_consume_token_once() {
        let repo = InMemoryAccountRepository::new();
        let mut tx = repo.begin().await.unwrap();
        let mut account = tx.create(&draft("ada", "ada@example.com")).await.unwrap();
        account.set_reset_token("digest".into(), OffsetDateTime::now_utc() + time::Duration::minutes(15));
        tx.save(&account).await.unwrap();
        tx.commit().await.unwrap();

        let mut a = repo.begin().await.unwrap();
        let mut b = repo.begin().await.unwrap();
        let mut seen_a = a.find_by_reset_token("digest").await.unwrap().expect("a sees token");
        let mut seen_b = b.find_by_reset_token("digest").await.unwrap().expect("b sees token");
        seen_a.password_hash = "$argon2id$a".into();
        seen_a.clear_reset_token();
        seen_b.password_hash = "$argon2id$b".into();
        seen_b.clear_reset_token();
        a.save(&seen_a).await.unwrap();
        b.save(&seen_b).await.unwrap();

        a.commit().await.unwrap();
        let err = b.commit().await.unwrap_err();
        assert!(matches!(err, RepoError::Database(_)));

        let stored = repo.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "$argon2id$a");
        assert!(stored.reset_token.is_none());
    }

    #[tokio::test]
    async fn stale_write_loses_to_committed_update() {
        let repo = InMemoryAccountRepository::new();
        let mut tx = repo.begin().await.unwrap();
        let account = tx.create(&draft("ada", "ada@example.com")).await.unwrap();
        tx.commit().await.unwrap();

        let mut slow = repo.begin().await.unwrap();
        let mut renamed = slow.find_by_id(account.id).await.unwrap().unwrap();

        let mut changed = account.clone();
        changed.password_hash = "$argon2id$new".into();
        repo.save(&changed).await.unwrap();

        renamed.user_name = "lovelace".into();
        slow.save(&renamed).await.unwrap();
        assert!(slow.commit().await.is_err());

        let stored = repo.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "$argon2id$new");
        assert_eq!(stored.user_name, "ada");
    }

    #[tokio::test]
    async fn disjoint_transactions_both_commit() {
        let repo = InMemoryAccountRepository::new();
        let mut tx = repo.begin().await.unwrap();
        let ada = tx.create(&draft("ada", "ada@example.com")).await.unwrap();
        let bob = tx.create(&draft("bob", "bob@example.com")).await.unwrap();
        tx.commit().await.unwrap();

        let mut a = repo.begin().await.unwrap();
        let mut b = repo.begin().await.unwrap();
        let mut ada = a.find_by_id(ada.id).await.unwrap().unwrap();
        let mut bob = b.find_by_id(bob.id).await.unwrap().unwrap();
        ada.user_name = "ada2".into();
        bob.user_name = "bob2".into();
        a.save(&ada).await.unwrap();
        b.save(&bob).await.unwrap();

        a.commit().await.unwrap();
        b.commit().await.unwrap();
        assert!(repo.find_by_user_name("ada2").await.unwrap().is_some());
        assert!(repo.find_by_user_name("bob2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn save_outside_transaction_reports_conflict_and_changes_nothing() {
        let repo = InMemoryAccountRepository::new();
        let mut tx = repo.begin().await.unwrap();
        tx.create(&draft("ada", "ada@example.com")).await.unwrap();
        let mut bob = tx.create(&draft("bob", "bob@example.com")).await.unwrap();
        tx.commit().await.unwrap();

        bob.email = "ada@example.com".into();
        let err = repo.save(&bob).await.unwrap_err();

        assert!(matches!(err, RepoError::DuplicateKey(UniqueField::Email)));
        let stored = repo.find_by_id(bob.id).await.unwrap().unwrap();
        assert_eq!(stored.email, "bob@example.com");
    }

    #[tokio::test]
    async fn reset_token_lookup_sees_staged_state() {
        let repo = InMemoryAccountRepository::new();
        let mut tx = repo.begin().await.unwrap();
        let mut account = tx.create(&draft("ada", "ada@example.com")).await.unwrap();
        account.set_reset_token("digest".into(), OffsetDateTime::now_utc());
        tx.save(&account).await.unwrap();

        let found = tx.find_by_reset_token("digest").await.unwrap();
        assert_eq!(found.map(|a| a.id), Some(account.id));
        assert!(tx.find_by_reset_token("other").await.unwrap().is_none());
    }
}
