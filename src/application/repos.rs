//! Repository traits describing persistence adapters.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::{
    page::Page,
    project::{ProductFormat, Project},
};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("stored record is corrupt: {message}")]
    Integrity { message: String },
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Read access to photobook projects. Every method is scoped to a tenant so
/// adapters never have to infer ownership.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn find_project_for_tenant(
        &self,
        tenant_id: &str,
        project_id: &str,
    ) -> Result<Option<Project>, RepoError>;

    async fn find_pages_for_tenant(
        &self,
        tenant_id: &str,
        project_id: &str,
    ) -> Result<Vec<Page>, RepoError> {
        Ok(self
            .find_project_for_tenant(tenant_id, project_id)
            .await?
            .map(|project| project.pages)
            .unwrap_or_default())
    }

    async fn find_page_for_tenant(
        &self,
        tenant_id: &str,
        project_id: &str,
        page_id: &str,
    ) -> Result<Option<(Page, u64)>, RepoError> {
        Ok(self
            .find_project_for_tenant(tenant_id, project_id)
            .await?
            .and_then(|project| {
                let version = project.version;
                project.page(page_id).cloned().map(|page| (page, version))
            }))
    }

    async fn product_format_for_tenant(
        &self,
        tenant_id: &str,
        project_id: &str,
    ) -> Result<Option<ProductFormat>, RepoError> {
        Ok(self
            .find_project_for_tenant(tenant_id, project_id)
            .await?
            .and_then(|project| project.product_format))
    }
}

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob key `{key}` is invalid")]
    InvalidKey { key: String },
    #[error("blob `{key}` not found")]
    NotFound { key: String },
    #[error("blob store io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub key: String,
    pub size: u64,
    pub modified_at: OffsetDateTime,
}

/// Object storage for rendered artifacts.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key` and return the public URL.
    async fn upload(
        &self,
        bytes: Bytes,
        key: &str,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<String, BlobError>;

    async fn download(&self, key: &str) -> Result<Bytes, BlobError>;

    async fn exists(&self, key: &str) -> Result<bool, BlobError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), BlobError>;

    async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>, BlobError>;

    fn url_for(&self, key: &str) -> String;
}
