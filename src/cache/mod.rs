//! Pressroom preview cache.
//!
//! Content-addressed, per-tenant storage of rendered previews on top of the
//! blob store, with a TTL and a per-tenant byte quota.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! ttl_seconds = 86400
//! tenant_quota_bytes = 104857600
//! eviction_fraction = 0.25
//! ```

mod config;
mod keys;
mod store;

pub use config::CacheConfig;
pub use keys::{CacheKey, CacheKeyInput, page_prefix, project_prefix, tenant_segment};
pub use store::{CacheError, CacheScope, CacheStats, CachedPreview, PreviewCache};
