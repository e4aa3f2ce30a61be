// =============================================================================
// Asset Store: locally managed asset metadata and admin preferences
// =============================================================================
//
// The store is an external document database in production. The service only
// reads from it; everything here is expressed as an async trait so a real
// backend can be dropped in. `InMemoryAssetStore` is the JSON-seeded stand-in
// used for standalone runs and tests.
// =============================================================================

pub mod memory;

pub use memory::InMemoryAssetStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::AssetMetadata;

/// Preference key holding the admin-curated list of popular provider ids.
pub const POPULAR_ASSETS_KEY: &str = "popular_assets";

/// Preference key holding how many popular assets anonymous visitors see.
pub const HOMEPAGE_COUNT_KEY: &str = "homepage_asset_count";

#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Metadata for every id that is managed locally. Unknown ids are skipped.
    async fn find_by_provider_ids(&self, ids: &[String]) -> Result<Vec<AssetMetadata>>;

    async fn find_by_provider_id(&self, id: &str) -> Result<Option<AssetMetadata>>;

    /// The first `limit` assets in store order.
    async fn list_all(&self, limit: usize) -> Result<Vec<AssetMetadata>>;

    /// Admin-configured popular ids, in configured order, truncated to `limit`.
    async fn list_popular_ids(&self, limit: Option<usize>) -> Result<Vec<String>>;

    /// An integer preference, if configured and numeric.
    async fn get_configured_count(&self, key: &str) -> Result<Option<i64>>;
}
