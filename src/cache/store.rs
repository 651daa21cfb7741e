//! Preview cache over the blob store.
//!
//! Each entry is two blobs under `cache/previews/{tenant}/`: the rendered
//! artifact `{key}.{ext}` and its metadata `{key}.json`. The artifact is
//! written first and the metadata last, so a reader never finds metadata that
//! points at bytes which were not yet stored. Store failures are logged and
//! reported as misses.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Instant,
};

use bytes::Bytes;
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{
    application::repos::{BlobEntry, BlobError, BlobStore},
    domain::options::OutputFormat,
};

use super::{
    config::CacheConfig,
    keys::{CacheKey, page_prefix, project_prefix, tenant_segment},
};

const SOURCE: &str = "cache::store";
const ROOT: &str = "cache/previews";
const METADATA_EXT: &str = "json";

const METRIC_HIT: &str = "pressroom_cache_hit_total";
const METRIC_MISS: &str = "pressroom_cache_miss_total";
const METRIC_EVICT: &str = "pressroom_cache_evict_total";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPreview {
    pub blob_url: String,
    pub blob_key: String,
    pub content_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub size_bytes: u64,
    pub project_id: String,
    pub page_id: String,
}

/// Project and page an entry belongs to.
#[derive(Debug, Clone, Copy)]
pub struct CacheScope<'a> {
    pub project_id: &'a str,
    pub page_id: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_files: usize,
    pub total_size: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub oldest: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub newest: Option<OffsetDateTime>,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("preview cache is disabled")]
    Disabled,
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error("cache metadata could not be encoded: {0}")]
    Metadata(#[from] serde_json::Error),
}

type Clock = Arc<dyn Fn() -> OffsetDateTime + Send + Sync>;

/// Blobs sharing a cache key stem (artifact plus metadata).
#[derive(Debug)]
struct StoredEntry {
    keys: Vec<String>,
    size: u64,
    modified_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct PreviewCache {
    blobs: Arc<dyn BlobStore>,
    config: CacheConfig,
    clock: Clock,
}

impl PreviewCache {
    pub fn new(blobs: Arc<dyn BlobStore>, config: CacheConfig) -> Self {
        Self {
            blobs,
            config,
            clock: Arc::new(OffsetDateTime::now_utc),
        }
    }

    /// Replace the wall clock, used to exercise expiry.
    pub fn with_clock(mut self, clock: impl Fn() -> OffsetDateTime + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn tenant_root(tenant_id: &str) -> String {
        format!("{ROOT}/{}/", tenant_segment(tenant_id))
    }

    fn metadata_key(tenant_id: &str, key: &CacheKey) -> String {
        format!("{}{key}.{METADATA_EXT}", Self::tenant_root(tenant_id))
    }

    fn blob_key(tenant_id: &str, key: &CacheKey, format: OutputFormat) -> String {
        format!("{}{key}.{}", Self::tenant_root(tenant_id), format.extension())
    }

    pub async fn get(&self, tenant_id: &str, key: &CacheKey) -> Option<CachedPreview> {
        if !self.config.enabled {
            return None;
        }

        let metadata_key = Self::metadata_key(tenant_id, key);
        let raw = match self.blobs.download(&metadata_key).await {
            Ok(raw) => raw,
            Err(BlobError::NotFound { .. }) => return self.miss(tenant_id, key, "absent"),
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "cache::get",
                    tenant_id,
                    key = %key,
                    error = %err,
                    "cache metadata read failed"
                );
                return self.miss(tenant_id, key, "store_error");
            }
        };

        let entry: CachedPreview = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "cache::get",
                    tenant_id,
                    key = %key,
                    error = %err,
                    "discarding unreadable cache metadata"
                );
                self.discard(&[metadata_key]).await;
                return self.miss(tenant_id, key, "corrupt");
            }
        };

        if entry.expires_at <= (self.clock)() {
            self.discard(&[entry.blob_key.clone(), metadata_key]).await;
            return self.miss(tenant_id, key, "expired");
        }

        match self.blobs.exists(&entry.blob_key).await {
            Ok(true) => {
                counter!(METRIC_HIT).increment(1);
                debug!(target = SOURCE, op = "cache::get", tenant_id, key = %key, result = "hit");
                Some(entry)
            }
            Ok(false) => {
                self.discard(&[metadata_key]).await;
                self.miss(tenant_id, key, "blob_missing")
            }
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "cache::get",
                    tenant_id,
                    key = %key,
                    error = %err,
                    "cache blob existence check failed"
                );
                self.miss(tenant_id, key, "store_error")
            }
        }
    }

    fn miss(&self, tenant_id: &str, key: &CacheKey, reason: &'static str) -> Option<CachedPreview> {
        counter!(METRIC_MISS, "reason" => reason).increment(1);
        debug!(
            target = SOURCE,
            op = "cache::get",
            tenant_id,
            key = %key,
            result = "miss",
            reason
        );
        None
    }

    pub async fn put(
        &self,
        tenant_id: &str,
        key: &CacheKey,
        bytes: Bytes,
        format: OutputFormat,
        scope: CacheScope<'_>,
    ) -> Result<CachedPreview, CacheError> {
        if !self.config.enabled {
            return Err(CacheError::Disabled);
        }

        let blob_key = Self::blob_key(tenant_id, key, format);
        let size_bytes = bytes.len() as u64;
        let metadata = BTreeMap::from([
            ("tenant_id".to_string(), tenant_id.to_string()),
            ("project_id".to_string(), scope.project_id.to_string()),
            ("page_id".to_string(), scope.page_id.to_string()),
        ]);
        let blob_url = self
            .blobs
            .upload(bytes, &blob_key, format.content_type(), &metadata)
            .await?;

        let created_at = (self.clock)();
        let entry = CachedPreview {
            blob_url,
            blob_key,
            content_type: format.content_type().to_string(),
            created_at,
            expires_at: created_at + self.config.ttl,
            size_bytes,
            project_id: scope.project_id.to_string(),
            page_id: scope.page_id.to_string(),
        };
        let encoded = serde_json::to_vec(&entry)?;
        self.blobs
            .upload(
                Bytes::from(encoded),
                &Self::metadata_key(tenant_id, key),
                "application/json",
                &metadata,
            )
            .await?;

        self.enforce_quota(tenant_id).await;
        Ok(entry)
    }

    /// Drop every entry of a project, or of one page when `page_id` is set.
    /// Returns the number of entries removed.
    pub async fn invalidate(&self, tenant_id: &str, project_id: &str, page_id: Option<&str>) -> usize {
        let prefix = match page_id {
            Some(page_id) => page_prefix(project_id, page_id),
            None => project_prefix(project_id),
        };
        let listing_prefix = format!("{}{prefix}", Self::tenant_root(tenant_id));

        let entries = match self.blobs.list(&listing_prefix).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "cache::invalidate",
                    tenant_id,
                    project_id,
                    error = %err,
                    "cache invalidation listing failed"
                );
                return 0;
            }
        };

        let grouped = group_entries(entries);
        let removed = grouped.len();
        for entry in grouped {
            self.discard(&entry.keys).await;
        }

        info!(
            target = SOURCE,
            op = "cache::invalidate",
            tenant_id,
            project_id,
            page_id = page_id.unwrap_or("*"),
            removed,
            "preview cache invalidated"
        );
        removed
    }

    pub async fn stats(&self, tenant_id: &str) -> CacheStats {
        let entries = match self.blobs.list(&Self::tenant_root(tenant_id)).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "cache::stats",
                    tenant_id,
                    error = %err,
                    "cache stats listing failed"
                );
                return CacheStats::default();
            }
        };

        entries.iter().fold(CacheStats::default(), |mut stats, entry| {
            stats.total_files += 1;
            stats.total_size += entry.size;
            stats.oldest = Some(match stats.oldest {
                Some(oldest) => oldest.min(entry.modified_at),
                None => entry.modified_at,
            });
            stats.newest = Some(match stats.newest {
                Some(newest) => newest.max(entry.modified_at),
                None => entry.modified_at,
            });
            stats
        })
    }

    async fn enforce_quota(&self, tenant_id: &str) {
        let started_at = Instant::now();
        let entries = match self.blobs.list(&Self::tenant_root(tenant_id)).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "cache::enforce_quota",
                    tenant_id,
                    error = %err,
                    "quota check skipped"
                );
                return;
            }
        };

        let total: u64 = entries.iter().map(|entry| entry.size).sum();
        if total <= self.config.tenant_quota_bytes {
            return;
        }

        let mut grouped = group_entries(entries);
        grouped.sort_by(|a, b| {
            a.modified_at
                .cmp(&b.modified_at)
                .then_with(|| a.keys.cmp(&b.keys))
        });
        let evict = self.config.eviction_count(grouped.len());
        let mut freed = 0u64;
        for entry in grouped.iter().take(evict) {
            freed += entry.size;
            self.discard(&entry.keys).await;
        }
        counter!(METRIC_EVICT).increment(evict as u64);

        info!(
            target = SOURCE,
            op = "cache::enforce_quota",
            tenant_id,
            total_bytes = total,
            quota_bytes = self.config.tenant_quota_bytes,
            evicted = evict,
            freed_bytes = freed,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "tenant preview cache over quota"
        );
    }

    async fn discard(&self, keys: &[String]) {
        for key in keys {
            if let Err(err) = self.blobs.delete(key).await {
                warn!(
                    target = SOURCE,
                    op = "cache::discard",
                    blob_key = %key,
                    error = %err,
                    "failed to delete cache blob"
                );
            }
        }
    }
}

/// Fold artifact and metadata blobs into one entry per cache key. The
/// entry's age is that of its newest blob.
fn group_entries(entries: Vec<BlobEntry>) -> Vec<StoredEntry> {
    let mut grouped: HashMap<String, StoredEntry> = HashMap::new();
    for entry in entries {
        let stem = match entry.key.rsplit_once('.') {
            Some((stem, _ext)) => stem.to_string(),
            None => entry.key.clone(),
        };
        let slot = grouped.entry(stem).or_insert_with(|| StoredEntry {
            keys: Vec::new(),
            size: 0,
            modified_at: entry.modified_at,
        });
        slot.size += entry.size;
        slot.modified_at = slot.modified_at.max(entry.modified_at);
        slot.keys.push(entry.key);
    }
    grouped
        .into_values()
        .map(|mut entry| {
            entry.keys.sort();
            entry
        })
        .collect()
}
