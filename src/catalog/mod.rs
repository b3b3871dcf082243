//! Entitlement catalog
//!
//! The fixed list of offerings the engine reasons about. Loaded once per
//! session through a [`CatalogProvider`] and cached; callers decide when to
//! reload and whether to retry.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::CatalogError;
use crate::models::Offering;

/// The external product registry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn load_offerings(&self, app_id: &str) -> Result<Vec<Offering>, CatalogError>;
}

/// Provider backed by a list held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalogProvider {
    offerings: Vec<Offering>,
}

impl StaticCatalogProvider {
    pub fn new(offerings: Vec<Offering>) -> Self {
        Self { offerings }
    }
}

#[async_trait]
impl CatalogProvider for StaticCatalogProvider {
    async fn load_offerings(&self, _app_id: &str) -> Result<Vec<Offering>, CatalogError> {
        Ok(self.offerings.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub app_id: String,
    pub offerings: Vec<Offering>,
}

/// Provider reading a [`CatalogDocument`] from a JSON file.
#[derive(Debug, Clone)]
pub struct JsonCatalogProvider {
    path: PathBuf,
}

impl JsonCatalogProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogProvider for JsonCatalogProvider {
    async fn load_offerings(&self, app_id: &str) -> Result<Vec<Offering>, CatalogError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| CatalogError::Unavailable(format!("{}: {}", self.path.display(), e)))?;

        let document: CatalogDocument = serde_json::from_str(&raw)
            .map_err(|e| CatalogError::Unavailable(format!("malformed catalog: {}", e)))?;

        if document.app_id != app_id {
            warn!("Catalog file is for app '{}', expected '{}'", document.app_id, app_id);
            return Ok(Vec::new());
        }

        Ok(document.offerings)
    }
}

/// Session cache in front of a [`CatalogProvider`].
pub struct EntitlementCatalog {
    provider: Arc<dyn CatalogProvider>,
    app_id: String,
    timeout: Duration,
    cache: RwLock<Option<Arc<Vec<Offering>>>>,
}

impl EntitlementCatalog {
    pub fn new(provider: Arc<dyn CatalogProvider>, app_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider,
            app_id: app_id.into(),
            timeout,
            cache: RwLock::new(None),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Returns the cached offerings, fetching them on first use.
    pub async fn load(&self) -> Result<Arc<Vec<Offering>>, CatalogError> {
        if let Some(cached) = self.cached().await {
            return Ok(cached);
        }
        self.reload().await
    }

    /// Fetches from the provider. On failure the previous cache is kept.
    pub async fn reload(&self) -> Result<Arc<Vec<Offering>>, CatalogError> {
        let offerings = Arc::new(self.fetch().await?);
        *self.cache.write().await = Some(offerings.clone());
        info!("Catalog loaded for '{}': {} offerings", self.app_id, offerings.len());
        Ok(offerings)
    }

    pub async fn cached(&self) -> Option<Arc<Vec<Offering>>> {
        self.cache.read().await.clone()
    }

    pub async fn offering(&self, id: &str) -> Option<Offering> {
        self.cached().await?.iter().find(|o| o.id == id).cloned()
    }

    pub async fn subscriptions(&self) -> Vec<Offering> {
        self.filtered(Offering::is_subscription).await
    }

    pub async fn unlocks(&self) -> Vec<Offering> {
        self.filtered(Offering::is_unlock).await
    }

    async fn filtered(&self, keep: fn(&Offering) -> bool) -> Vec<Offering> {
        match self.cached().await {
            Some(offerings) => offerings.iter().filter(|o| keep(o)).cloned().collect(),
            None => Vec::new(),
        }
    }

    async fn fetch(&self) -> Result<Vec<Offering>, CatalogError> {
        debug!("Loading catalog for '{}'", self.app_id);
        let loaded = tokio::time::timeout(self.timeout, self.provider.load_offerings(&self.app_id))
            .await
            .map_err(|_| CatalogError::Unavailable(format!("timed out after {:?}", self.timeout)))??;

        let offerings = dedupe(loaded);
        if offerings.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(offerings)
    }
}

/// Keeps the first occurrence of each id; catalog order decides ties later.
fn dedupe(offerings: Vec<Offering>) -> Vec<Offering> {
    let mut seen = HashSet::new();
    offerings
        .into_iter()
        .filter(|o| {
            let first = seen.insert(o.id.clone());
            if !first {
                warn!("Duplicate offering '{}' in catalog, keeping the first", o.id);
            }
            first
        })
        .collect()
}
