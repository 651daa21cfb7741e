//! Filesystem-backed blob storage.

use std::{
    collections::BTreeMap,
    io::Write,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tokio::fs;
use tracing::debug;

use crate::application::repos::{BlobEntry, BlobError, BlobStore};

const TEMP_PREFIX: &str = ".blob-";

/// Stores each blob as a file under `root`, keyed by its relative path.
#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsBlobStore {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf, public_base_url: impl Into<String>) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the absolute filesystem path for a key, refusing anything that
    /// could escape the root.
    fn resolve(&self, key: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(key);
        let escapes = key.is_empty()
            || relative.is_absolute()
            || relative.components().any(|component| {
                matches!(
                    component,
                    Component::ParentDir | Component::Prefix(_) | Component::RootDir
                )
            });
        if escapes {
            return Err(BlobError::InvalidKey {
                key: key.to_string(),
            });
        }

        Ok(self.root.join(relative))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|component| component.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(
        &self,
        bytes: Bytes,
        key: &str,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<String, BlobError> {
        let absolute = self.resolve(key)?;
        let parent = absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent).await?;

        let checksum = hex::encode(Sha256::digest(&bytes));
        let size = bytes.len();
        let target = absolute.clone();
        tokio::task::spawn_blocking(move || -> Result<(), std::io::Error> {
            let mut staged = tempfile::Builder::new()
                .prefix(TEMP_PREFIX)
                .tempfile_in(&parent)?;
            staged.write_all(&bytes)?;
            staged.flush()?;
            staged.persist(&target).map_err(|err| err.error)?;
            Ok(())
        })
        .await
        .map_err(|err| BlobError::Io(std::io::Error::other(err)))??;

        debug!(
            target = "infra::blobs::fs",
            op = "blobs::upload",
            blob_key = key,
            content_type,
            size_bytes = size,
            checksum = %checksum,
            metadata_fields = metadata.len(),
            "blob stored"
        );

        Ok(self.url_for(key))
    }

    async fn download(&self, key: &str) -> Result<Bytes, BlobError> {
        let absolute = self.resolve(key)?;
        match fs::read(&absolute).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(BlobError::NotFound {
                key: key.to_string(),
            }),
            Err(err) => Err(BlobError::Io(err)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        let absolute = self.resolve(key)?;
        Ok(fs::try_exists(&absolute).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let absolute = self.resolve(key)?;
        match fs::remove_file(&absolute).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BlobError::Io(err)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>, BlobError> {
        let directory = match prefix.rsplit_once('/') {
            Some((directory, _)) => self.resolve(directory)?,
            None => self.root.clone(),
        };

        let mut pending = vec![directory];
        let mut entries = Vec::new();
        while let Some(dir) = pending.pop() {
            let mut reader = match fs::read_dir(&dir).await {
                Ok(reader) => reader,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(BlobError::Io(err)),
            };

            while let Some(item) = reader.next_entry().await? {
                let file_type = item.file_type().await?;
                let path = item.path();
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                let staged = item
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(TEMP_PREFIX));
                if staged {
                    continue;
                }
                let Some(key) = self.key_for(&path) else {
                    continue;
                };
                if !key.starts_with(prefix) {
                    continue;
                }
                let meta = item.metadata().await?;
                let modified_at = meta
                    .modified()
                    .map(OffsetDateTime::from)
                    .unwrap_or(OffsetDateTime::UNIX_EPOCH);
                entries.push(BlobEntry {
                    key,
                    size: meta.len(),
                    modified_at,
                });
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{key}", self.public_base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FsBlobStore {
        FsBlobStore::new(dir.path().join("blobs"), "http://localhost:8080/blobs/").expect("store")
    }

    #[tokio::test]
    async fn upload_download_delete() {
        let dir = TempDir::new().expect("temp dir");
        let blobs = store(&dir);

        let url = blobs
            .upload(
                Bytes::from_static(b"%PDF-1.7"),
                "production/acme/p1/1.pdf",
                "application/pdf",
                &BTreeMap::new(),
            )
            .await
            .expect("upload");
        assert_eq!(url, "http://localhost:8080/blobs/production/acme/p1/1.pdf");
        assert!(blobs.exists("production/acme/p1/1.pdf").await.expect("exists"));
        assert_eq!(
            blobs.download("production/acme/p1/1.pdf").await.expect("download"),
            Bytes::from_static(b"%PDF-1.7")
        );

        blobs.delete("production/acme/p1/1.pdf").await.expect("delete");
        blobs.delete("production/acme/p1/1.pdf").await.expect("delete twice");
        assert!(matches!(
            blobs.download("production/acme/p1/1.pdf").await,
            Err(BlobError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let blobs = store(&dir);
        for key in ["../escape", "/etc/passwd", "a/../../b", ""] {
            assert!(
                matches!(blobs.download(key).await, Err(BlobError::InvalidKey { .. })),
                "{key}"
            );
        }
    }

    #[tokio::test]
    async fn list_filters_by_key_prefix() {
        let dir = TempDir::new().expect("temp dir");
        let blobs = store(&dir);
        for key in [
            "cache/previews/acme/aaa_1.png",
            "cache/previews/acme/aaa_1.json",
            "cache/previews/acme/bbb_1.png",
            "cache/previews/other/aaa_1.png",
        ] {
            blobs
                .upload(Bytes::from_static(b"x"), key, "image/png", &BTreeMap::new())
                .await
                .expect("upload");
        }

        let keys: Vec<_> = blobs
            .list("cache/previews/acme/aaa_")
            .await
            .expect("list")
            .into_iter()
            .map(|entry| entry.key)
            .collect();
        assert_eq!(
            keys,
            vec!["cache/previews/acme/aaa_1.json", "cache/previews/acme/aaa_1.png"]
        );

        assert_eq!(blobs.list("cache/previews/acme/").await.expect("list").len(), 3);
        assert!(blobs.list("nothing/here/").await.expect("list").is_empty());
    }
}
