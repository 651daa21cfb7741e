//! Projects as handed over by the project store.

use serde::{Deserialize, Serialize};

use super::page::Page;

/// Physical product a project is printed as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductFormat {
    pub code: String,
    pub width_mm: f64,
    pub height_mm: f64,
    #[serde(default)]
    pub binding: Option<String>,
    #[serde(default)]
    pub paper: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    /// Bumped on every edit; part of the preview cache key.
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub product_format: Option<ProductFormat>,
    #[serde(default)]
    pub pages: Vec<Page>,
}

impl Project {
    pub fn page(&self, page_id: &str) -> Option<&Page> {
        self.pages.iter().find(|page| page.id == page_id)
    }

    /// Pages matching `page_ids` in the requested order, or every page when empty.
    pub fn select_pages(&self, page_ids: &[String]) -> Result<Vec<Page>, String> {
        if page_ids.is_empty() {
            return Ok(self.pages.clone());
        }
        page_ids
            .iter()
            .map(|id| self.page(id).cloned().ok_or_else(|| id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> Project {
        let page = |id: &str| Page {
            id: id.into(),
            width_mm: 200.0,
            height_mm: 200.0,
            background: "#fff".into(),
            elements: Vec::new(),
        };
        Project {
            id: "proj".into(),
            version: 1,
            title: None,
            product_format: None,
            pages: vec![page("a"), page("b"), page("c")],
        }
    }

    #[test]
    fn select_pages_keeps_requested_order() {
        let selected = project()
            .select_pages(&["c".to_string(), "a".to_string()])
            .expect("known pages");
        let ids: Vec<_> = selected.iter().map(|page| page.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn select_pages_reports_unknown_id() {
        let missing = project()
            .select_pages(&["a".to_string(), "zz".to_string()])
            .expect_err("unknown page");
        assert_eq!(missing, "zz");
    }
}
