//! In-process blob storage for ephemeral runs and tests.

use std::{collections::BTreeMap, sync::Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use time::{Duration, OffsetDateTime};

use crate::{
    application::repos::{BlobEntry, BlobError, BlobStore},
    util::lock::mutex_lock,
};

const SOURCE: &str = "infra::blobs::memory";

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Bytes,
    content_type: String,
    modified_at: OffsetDateTime,
}

#[derive(Debug, Default)]
struct State {
    blobs: BTreeMap<String, StoredBlob>,
    last_modified: Option<OffsetDateTime>,
}

/// Keeps blobs in memory. Modification times are strictly increasing so
/// age-based ordering stays deterministic even within one clock tick.
#[derive(Debug)]
pub struct MemoryBlobStore {
    state: Mutex<State>,
    public_base_url: String,
}

impl MemoryBlobStore {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        let state = mutex_lock(&self.state, SOURCE, "content_type");
        state.blobs.get(key).map(|blob| blob.content_type.clone())
    }

    fn validate(key: &str) -> Result<(), BlobError> {
        let invalid = key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|segment| segment == ".." || segment.is_empty());
        if invalid {
            return Err(BlobError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        bytes: Bytes,
        key: &str,
        content_type: &str,
        _metadata: &BTreeMap<String, String>,
    ) -> Result<String, BlobError> {
        Self::validate(key)?;
        let mut state = mutex_lock(&self.state, SOURCE, "upload");
        let now = OffsetDateTime::now_utc();
        let modified_at = match state.last_modified {
            Some(last) if now <= last => last + Duration::nanoseconds(1),
            _ => now,
        };
        state.last_modified = Some(modified_at);
        state.blobs.insert(
            key.to_string(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
                modified_at,
            },
        );
        Ok(self.url_for(key))
    }

    async fn download(&self, key: &str) -> Result<Bytes, BlobError> {
        Self::validate(key)?;
        let state = mutex_lock(&self.state, SOURCE, "download");
        state
            .blobs
            .get(key)
            .map(|blob| blob.bytes.clone())
            .ok_or_else(|| BlobError::NotFound {
                key: key.to_string(),
            })
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        Self::validate(key)?;
        Ok(mutex_lock(&self.state, SOURCE, "exists").blobs.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        Self::validate(key)?;
        mutex_lock(&self.state, SOURCE, "delete").blobs.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>, BlobError> {
        let state = mutex_lock(&self.state, SOURCE, "list");
        Ok(state
            .blobs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, blob)| BlobEntry {
                key: key.clone(),
                size: blob.bytes.len() as u64,
                modified_at: blob.modified_at,
            })
            .collect())
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{key}", self.public_base_url)
    }
}
