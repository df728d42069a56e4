//! Fakes and fixtures shared by the unit tests.

use std::{
    collections::HashMap,
    io::{Cursor, Write},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageBuffer, ImageFormat, Rgb};

use crate::media::AvatarUpload;
use crate::notify::{Notification, Notifier};
use crate::storage::StorageClient;

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryStorage {
    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().unwrap().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn put_object(&self, key: &str, body: Bytes, _ct: &str) -> anyhow::Result<()> {
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Ok(())
    }
    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
    fn public_url(&self, key: &str) -> String {
        format!("https://media.fake.local/{}", key)
    }
}

pub struct FailingStorage;

#[async_trait]
impl StorageClient for FailingStorage {
    async fn put_object(&self, _k: &str, _b: Bytes, _ct: &str) -> anyhow::Result<()> {
        anyhow::bail!("store unavailable")
    }
    async fn delete_object(&self, _k: &str) -> anyhow::Result<()> {
        anyhow::bail!("store unavailable")
    }
    fn public_url(&self, key: &str) -> String {
        format!("https://media.fake.local/{}", key)
    }
}

pub struct SlowStorage;

#[async_trait]
impl StorageClient for SlowStorage {
    async fn put_object(&self, _k: &str, _b: Bytes, _ct: &str) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
    async fn delete_object(&self, _k: &str) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
    fn public_url(&self, key: &str) -> String {
        format!("https://media.fake.local/{}", key)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    /// Plain reset token from the most recent reset link.
    pub fn last_reset_token(&self) -> Option<String> {
        let sent = self.sent.lock().unwrap();
        let body = &sent.last()?.body;
        let start = body.find("/reset-password/")? + "/reset-password/".len();
        let token: String = body[start..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        Some(token)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _message: &Notification) -> anyhow::Result<()> {
        anyhow::bail!("smtp relay refused connection")
    }
}

pub struct SlowNotifier;

#[async_trait]
impl Notifier for SlowNotifier {
    async fn send(&self, _message: &Notification) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

pub fn png_fixture(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).expect("encode png fixture");
    out.into_inner()
}

pub fn temp_avatar(bytes: &[u8]) -> AvatarUpload {
    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    file.write_all(bytes).expect("write temp file");
    AvatarUpload::new(file.into_temp_path())
}
