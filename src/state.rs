use std::sync::Arc;

use crate::accounts::{
    memory::InMemoryAccountRepository,
    password::CredentialHasher,
    repo::{AccountRepository, PgAccountRepository},
    tokens::SessionKeys,
};
use crate::config::AppConfig;
use crate::db;
use crate::media::MediaStore;
use crate::notify::{self, Notifier};
use crate::storage::{Storage, StorageClient};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub accounts: Arc<dyn AccountRepository>,
    pub media: MediaStore,
    pub notifier: Arc<dyn Notifier>,
    pub keys: SessionKeys,
    pub hasher: CredentialHasher,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let accounts = match &config.database_url {
            Some(url) => {
                let pool = db::connect(url).await?;
                db::migrate(&pool).await?;
                Arc::new(PgAccountRepository::new(pool)) as Arc<dyn AccountRepository>
            }
            None => {
                tracing::warn!("DATABASE_URL not set; accounts are kept in memory and lost on restart");
                Arc::new(InMemoryAccountRepository::new()) as Arc<dyn AccountRepository>
            }
        };

        // Real S3/MinIO
        let storage = Arc::new(Storage::new(&config.media).await?) as Arc<dyn StorageClient>;

        let notifier = notify::from_config(&config.notify)?;

        Self::from_parts(config, accounts, storage, notifier)
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        accounts: Arc<dyn AccountRepository>,
        storage: Arc<dyn StorageClient>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            media: MediaStore::new(storage, &config.media),
            keys: SessionKeys::from_config(&config.jwt),
            hasher: CredentialHasher::new(&config.hash)?,
            config,
            accounts,
            notifier,
        })
    }
}

#[cfg(test)]
impl AppState {
    pub fn fake() -> Self {
        use crate::test_support::{MemoryStorage, RecordingNotifier};

        Self::from_parts(
            Arc::new(crate::config::test_config()),
            Arc::new(InMemoryAccountRepository::new()),
            Arc::new(MemoryStorage::default()),
            Arc::new(RecordingNotifier::default()),
        )
        .expect("test state")
    }
}
