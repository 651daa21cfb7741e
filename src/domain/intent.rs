//! Typed payloads carried by queued render jobs.

use serde::{Deserialize, Serialize};

use super::{jobs::JobType, options::RenderOptions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewIntent {
    pub project_id: String,
    pub page_id: String,
    #[serde(default)]
    pub options: RenderOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalIntent {
    pub project_id: String,
    /// Empty means every page of the project.
    #[serde(default)]
    pub page_ids: Vec<String>,
    #[serde(default)]
    pub options: RenderOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionIntent {
    pub project_id: String,
    #[serde(default)]
    pub page_ids: Vec<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub options: RenderOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Render3dIntent {
    pub project_id: String,
    #[serde(default)]
    pub page_ids: Vec<String>,
    #[serde(default)]
    pub options: RenderOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderIntent {
    Preview(PreviewIntent),
    Final(FinalIntent),
    Production(ProductionIntent),
    Render3d(Render3dIntent),
}

impl RenderIntent {
    pub fn job_type(&self) -> JobType {
        match self {
            RenderIntent::Preview(_) => JobType::Preview,
            RenderIntent::Final(_) => JobType::Final,
            RenderIntent::Production(_) => JobType::Production,
            RenderIntent::Render3d(_) => JobType::Render3d,
        }
    }

    pub fn project_id(&self) -> &str {
        match self {
            RenderIntent::Preview(intent) => &intent.project_id,
            RenderIntent::Final(intent) => &intent.project_id,
            RenderIntent::Production(intent) => &intent.project_id,
            RenderIntent::Render3d(intent) => &intent.project_id,
        }
    }

    pub fn options(&self) -> &RenderOptions {
        match self {
            RenderIntent::Preview(intent) => &intent.options,
            RenderIntent::Final(intent) => &intent.options,
            RenderIntent::Production(intent) => &intent.options,
            RenderIntent::Render3d(intent) => &intent.options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_is_tagged_by_kind() {
        let intent = RenderIntent::Render3d(Render3dIntent {
            project_id: "p".into(),
            page_ids: vec!["cover".into()],
            options: RenderOptions::default(),
        });
        let value = serde_json::to_value(&intent).expect("serialize");
        assert_eq!(value["kind"], "render3d");

        let back: RenderIntent = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back.job_type(), JobType::Render3d);
        assert_eq!(back.project_id(), "p");
    }
}
