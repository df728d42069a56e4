use std::{path::Path, sync::Arc, time::Duration};

use bytes::Bytes;
use tempfile::TempPath;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{transform, Avatar};
use crate::{config::MediaConfig, storage::StorageClient};

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("read avatar temp file: {0}")]
    Io(#[from] std::io::Error),
    #[error("avatar is not a usable image: {0}")]
    Transform(String),
    #[error("media store error: {0:#}")]
    Store(anyhow::Error),
    #[error("media store deadline exceeded")]
    Timeout,
}

/// An avatar received from a client, parked in a local temp file.
///
/// The file is removed when the upload finishes or, if the upload never
/// happens, when this value is dropped.
#[derive(Debug)]
pub struct AvatarUpload {
    file: TempPath,
}

impl AvatarUpload {
    pub fn new(file: TempPath) -> Self {
        Self { file }
    }

    pub fn path(&self) -> &Path {
        &self.file
    }
}

#[derive(Clone)]
pub struct MediaStore {
    storage: Arc<dyn StorageClient>,
    folder: String,
    timeout: Duration,
}

impl MediaStore {
    pub fn new(storage: Arc<dyn StorageClient>, cfg: &MediaConfig) -> Self {
        Self {
            storage,
            folder: cfg.folder.trim_matches('/').to_string(),
            timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }

    /// Transform and store an avatar. The temp file is gone afterwards
    /// whatever the outcome.
    pub async fn upload(&self, upload: AvatarUpload) -> Result<Avatar, MediaError> {
        let AvatarUpload { file } = upload;
        let result = self.store_file(&file).await;
        if let Err(e) = file.close() {
            warn!(error = %e, "failed to remove avatar temp file");
        }
        result
    }

    async fn store_file(&self, path: &Path) -> Result<Avatar, MediaError> {
        let raw = tokio::fs::read(path).await?;
        let png = tokio::task::spawn_blocking(move || transform::square_avatar(&raw))
            .await
            .map_err(|e| MediaError::Transform(e.to_string()))?
            .map_err(|e| MediaError::Transform(e.to_string()))?;

        let key = format!("{}/{}.png", self.folder, Uuid::new_v4());
        tokio::time::timeout(
            self.timeout,
            self.storage.put_object(&key, Bytes::from(png), "image/png"),
        )
        .await
        .map_err(|_| MediaError::Timeout)?
        .map_err(MediaError::Store)?;

        debug!(media_id = %key, "avatar stored");
        Ok(Avatar {
            url: self.storage.public_url(&key),
            media_id: key,
        })
    }

    pub async fn delete(&self, media_id: &str) -> Result<(), MediaError> {
        tokio::time::timeout(self.timeout, self.storage.delete_object(media_id))
            .await
            .map_err(|_| MediaError::Timeout)?
            .map_err(MediaError::Store)?;
        debug!(media_id = %media_id, "avatar deleted");
        Ok(())
    }
}
