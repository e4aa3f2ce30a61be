use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use super::{AssetStore, POPULAR_ASSETS_KEY};
use crate::error::{MarketError, Result};
use crate::types::AssetMetadata;

/// On-disk seed format:
///
/// ```json
/// {
///   "assets": [ { "provider_id": "bitcoin", "code": "btc", "name": "Bitcoin" } ],
///   "preferences": { "popular_assets": ["bitcoin"], "homepage_asset_count": 5 }
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
struct StoreSeed {
    #[serde(default)]
    assets: Vec<AssetMetadata>,
    #[serde(default)]
    preferences: HashMap<String, serde_json::Value>,
}

/// Read-only asset store held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryAssetStore {
    assets: Vec<AssetMetadata>,
    preferences: HashMap<String, serde_json::Value>,
}

impl InMemoryAssetStore {
    /// Build a store from metadata and preference values. Codes are upper-cased,
    /// blank ids get a fresh UUID, and duplicate provider ids keep the first
    /// entry.
    pub fn new(assets: Vec<AssetMetadata>, preferences: HashMap<String, serde_json::Value>) -> Self {
        let mut seen = HashSet::new();
        let mut normalised = Vec::with_capacity(assets.len());

        for mut asset in assets {
            asset.provider_id = asset.provider_id.trim().to_string();
            if asset.provider_id.is_empty() {
                warn!(code = %asset.code, "skipping asset without provider id");
                continue;
            }
            if !seen.insert(asset.provider_id.clone()) {
                warn!(provider_id = %asset.provider_id, "duplicate provider id in asset seed, keeping first");
                continue;
            }
            asset.code = asset.code.trim().to_uppercase();
            asset.name = asset.name.trim().to_string();
            if asset.id.trim().is_empty() {
                asset.id = uuid::Uuid::new_v4().to_string();
            }
            normalised.push(asset);
        }

        Self {
            assets: normalised,
            preferences,
        }
    }

    pub fn from_json(json: &str) -> AnyResult<Self> {
        let seed: StoreSeed = serde_json::from_str(json).context("failed to parse asset seed JSON")?;
        Ok(Self::new(seed.assets, seed.preferences))
    }

    /// Load the seed file at `path`.
    pub fn load(path: impl AsRef<Path>) -> AnyResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read asset seed from {}", path.display()))?;
        let store = Self::from_json(&content)
            .with_context(|| format!("invalid asset seed in {}", path.display()))?;

        info!(
            path = %path.display(),
            assets = store.assets.len(),
            preferences = store.preferences.len(),
            "asset store loaded"
        );
        Ok(store)
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }
}

#[async_trait]
impl AssetStore for InMemoryAssetStore {
    async fn find_by_provider_ids(&self, ids: &[String]) -> Result<Vec<AssetMetadata>> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        Ok(self
            .assets
            .iter()
            .filter(|a| wanted.contains(a.provider_id.as_str()))
            .cloned()
            .collect())
    }

    async fn find_by_provider_id(&self, id: &str) -> Result<Option<AssetMetadata>> {
        Ok(self.assets.iter().find(|a| a.provider_id == id).cloned())
    }

    async fn list_all(&self, limit: usize) -> Result<Vec<AssetMetadata>> {
        Ok(self.assets.iter().take(limit).cloned().collect())
    }

    async fn list_popular_ids(&self, limit: Option<usize>) -> Result<Vec<String>> {
        let ids: Vec<String> = match self.preferences.get(POPULAR_ASSETS_KEY) {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(serde_json::Value::Array(values)) => values
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect(),
            Some(other) => return Err(malformed_preference(POPULAR_ASSETS_KEY, other)),
        };

        Ok(match limit {
            Some(n) => ids.into_iter().take(n).collect(),
            None => ids,
        })
    }

    async fn get_configured_count(&self, key: &str) -> Result<Option<i64>> {
        let count = match self.preferences.get(key) {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Some(value @ serde_json::Value::String(s)) => match s.trim().parse::<i64>() {
                Ok(n) => Some(n),
                Err(_) => return Err(malformed_preference(key, value)),
            },
            Some(other) => return Err(malformed_preference(key, other)),
        };
        Ok(count)
    }
}

/// A preference holding a value of the wrong shape is a broken store
/// document, not an empty setting.
fn malformed_preference(key: &str, value: &serde_json::Value) -> MarketError {
    warn!(key, value = %value, "malformed preference value");
    MarketError::Storage(format!("preference '{key}' holds malformed value {value}"))
}
