//! Content-addressed preview cache keys.
//!
//! A key is `{project_tag}_{page_tag}_{digest}`: the tags are short sha256
//! prefixes of the project and page ids, so every key of a project (or page)
//! shares a prefix and can be invalidated by listing. The digest covers every
//! input that changes the rendered bytes.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::domain::options::OutputFormat;

const TAG_LEN: usize = 12;

/// Inputs that determine the rendered bytes of a preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyInput<'a> {
    pub project_id: &'a str,
    pub page_id: &'a str,
    pub version: u64,
    pub width_px: u32,
    pub height_px: u32,
    pub dpi: u32,
    pub format: OutputFormat,
    /// Anything else that alters the output (quality, guides, background).
    pub variant: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(input: &CacheKeyInput<'_>) -> Self {
        let mut hasher = Sha256::new();
        for field in [
            input.project_id.as_bytes(),
            input.page_id.as_bytes(),
            &input.version.to_be_bytes(),
            &input.width_px.to_be_bytes(),
            &input.height_px.to_be_bytes(),
            &input.dpi.to_be_bytes(),
            input.format.as_str().as_bytes(),
            input.variant.as_bytes(),
        ] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field);
        }
        let digest = hex::encode(hasher.finalize());

        Self(format!(
            "{}{}",
            page_prefix(input.project_id, input.page_id),
            digest
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accept a key received from outside only if it has the derived shape.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split('_');
        let shape_ok = [TAG_LEN, TAG_LEN, 64].into_iter().all(|len| {
            parts
                .next()
                .is_some_and(|part| part.len() == len && part.bytes().all(|b| b.is_ascii_hexdigit()))
        });
        (shape_ok && parts.next().is_none()).then(|| Self(raw.to_string()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn tag(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(TAG_LEN);
    encoded
}

/// Prefix shared by every key of a project.
pub fn project_prefix(project_id: &str) -> String {
    format!("{}_", tag(project_id))
}

/// Prefix shared by every key of one page.
pub fn page_prefix(project_id: &str, page_id: &str) -> String {
    format!("{}_{}_", tag(project_id), tag(page_id))
}

/// Path segment for a tenant: ids made of `[A-Za-z0-9_-]` pass through,
/// anything else is replaced by its tag.
pub fn tenant_segment(tenant_id: &str) -> String {
    let safe = !tenant_id.is_empty()
        && tenant_id.len() <= 64
        && tenant_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if safe {
        tenant_id.to_string()
    } else {
        format!("t{}", tag(tenant_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> CacheKeyInput<'static> {
        CacheKeyInput {
            project_id: "project-1",
            page_id: "page-1",
            version: 3,
            width_px: 1240,
            height_px: 1754,
            dpi: 150,
            format: OutputFormat::Png,
            variant: "q90",
        }
    }

    #[test]
    fn identical_inputs_give_identical_keys() {
        assert_eq!(CacheKey::derive(&input()), CacheKey::derive(&input()));
    }

    #[test]
    fn every_field_changes_the_key() {
        let base = CacheKey::derive(&input());
        let variants = [
            CacheKeyInput { project_id: "project-2", ..input() },
            CacheKeyInput { page_id: "page-2", ..input() },
            CacheKeyInput { version: 4, ..input() },
            CacheKeyInput { width_px: 1241, ..input() },
            CacheKeyInput { height_px: 1755, ..input() },
            CacheKeyInput { dpi: 300, ..input() },
            CacheKeyInput { format: OutputFormat::Jpeg, ..input() },
            CacheKeyInput { variant: "q80", ..input() },
        ];
        for variant in variants {
            assert_ne!(CacheKey::derive(&variant), base, "{variant:?}");
        }
    }

    #[test]
    fn adjacent_fields_cannot_alias() {
        let a = CacheKey::derive(&CacheKeyInput {
            project_id: "ab",
            page_id: "c",
            ..input()
        });
        let b = CacheKey::derive(&CacheKeyInput {
            project_id: "a",
            page_id: "bc",
            ..input()
        });
        assert_ne!(a, b);
    }

    #[test]
    fn keys_start_with_project_and_page_prefixes() {
        let key = CacheKey::derive(&input());
        assert!(key.as_str().starts_with(&project_prefix("project-1")));
        assert!(key.as_str().starts_with(&page_prefix("project-1", "page-1")));
        assert!(!key.as_str().starts_with(&page_prefix("project-1", "page-2")));
    }

    #[test]
    fn parse_accepts_only_derived_shape() {
        let key = CacheKey::derive(&input());
        assert_eq!(CacheKey::parse(key.as_str()), Some(key));
        assert!(CacheKey::parse("../../etc/passwd").is_none());
        assert!(CacheKey::parse("abc_def_012").is_none());
    }

    #[test]
    fn unsafe_tenants_are_tagged() {
        assert_eq!(tenant_segment("acme-01"), "acme-01");
        let tagged = tenant_segment("../acme");
        assert!(tagged.starts_with('t'));
        assert_eq!(tagged.len(), TAG_LEN + 1);
    }
}
