use anyhow::{anyhow, Result};
use api::{parse_time, Clip};
use async_trait::async_trait;
use chrono::Utc;
use opendal::Operator;
use tracing::debug;

use crate::config::StorageConfig;
use crate::operator::init_operator;
use crate::path::{clip_path, kv_path, validate_path};

/// Durable store boundary shared by the capturer and every stage.
#[async_trait]
pub trait ClipStore: Send + Sync {
    /// Provider tag, e.g. `fs` or `s3`.
    fn provider(&self) -> &str;

    /// Upload the clip's local file and return an opaque cloud reference.
    async fn store_recording_clip(&self, clip: &Clip) -> Result<String>;

    /// Fetch clip bytes by the clip's cloud reference.
    async fn retrieve_recording_clip(&self, clip: &Clip) -> Result<Vec<u8>>;

    async fn store_key_value(&self, store: &str, key: &str, value: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct OpendalClipStore {
    op: Operator,
    provider: String,
}

impl OpendalClipStore {
    pub fn new(op: Operator, provider: impl Into<String>) -> Self {
        Self {
            op,
            provider: provider.into(),
        }
    }

    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        Ok(Self::new(init_operator(config).await?, config.provider()))
    }
}

#[async_trait]
impl ClipStore for OpendalClipStore {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn store_recording_clip(&self, clip: &Clip) -> Result<String> {
        let begin = parse_time(&clip.begin_time).unwrap_or_else(Utc::now);
        let key = clip_path(&clip.camera, begin, clip.file_name());
        if !validate_path(&key) {
            return Err(anyhow!("invalid object path {key}"));
        }

        let bytes = tokio::fs::read(&clip.local_reference).await?;
        let size = bytes.len();
        self.op.write(&key, bytes).await?;
        debug!(clip = clip.id, key, size, "clip uploaded");
        Ok(key)
    }

    async fn retrieve_recording_clip(&self, clip: &Clip) -> Result<Vec<u8>> {
        if clip.cloud_reference.is_empty() {
            return Err(anyhow!("clip {} has no cloud reference", clip.id));
        }
        let buf = self.op.read(&clip.cloud_reference).await?;
        Ok(buf.to_vec())
    }

    async fn store_key_value(&self, store: &str, key: &str, value: &str) -> Result<()> {
        self.op
            .write(&kv_path(store, key), value.as_bytes().to_vec())
            .await?;
        Ok(())
    }
}
