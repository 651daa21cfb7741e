//! Project store backed by JSON documents on disk.
//!
//! Layout: `{root}/{tenant_id}/{project_id}.json`, one [`Project`] per file.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tracing::warn;

use crate::{
    application::repos::{ProjectStore, RepoError},
    domain::project::Project,
};

#[derive(Debug, Clone)]
pub struct FsProjectStore {
    root: PathBuf,
}

impl FsProjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn project_path(&self, tenant_id: &str, project_id: &str) -> Result<PathBuf, RepoError> {
        for (label, value) in [("tenant", tenant_id), ("project", project_id)] {
            if !is_safe_segment(value) {
                return Err(RepoError::InvalidInput {
                    message: format!("{label} id `{value}` is not a valid identifier"),
                });
            }
        }
        Ok(self.root.join(tenant_id).join(format!("{project_id}.json")))
    }
}

fn is_safe_segment(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 128
        && !value.starts_with('.')
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

#[async_trait]
impl ProjectStore for FsProjectStore {
    async fn find_project_for_tenant(
        &self,
        tenant_id: &str,
        project_id: &str,
    ) -> Result<Option<Project>, RepoError> {
        let path = self.project_path(tenant_id, project_id)?;
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(RepoError::from_persistence(err)),
        };

        let project: Project = serde_json::from_slice(&raw).map_err(|err| {
            warn!(
                target = "infra::projects",
                op = "projects::find",
                tenant_id,
                project_id,
                path = %path.display(),
                error = %err,
                "project document is not valid"
            );
            RepoError::Integrity {
                message: format!("project `{project_id}` could not be decoded: {err}"),
            }
        })?;

        if project.id != project_id {
            return Err(RepoError::Integrity {
                message: format!(
                    "project document `{project_id}` declares id `{}`",
                    project.id
                ),
            });
        }
        Ok(Some(project))
    }
}
