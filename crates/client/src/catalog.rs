//! Product catalog client.
//!
//! The catalog is read-only and shared by every cart operation, so it is
//! fetched once and cached with a TTL. Guest totals and stock ceilings are
//! computed from whatever catalog is currently loaded.

use std::sync::Arc;

use cartsync_core::{Catalog, CatalogProduct};
use moka::future::Cache;
use tracing::{debug, instrument};
use url::Url;

use crate::config::ClientConfig;
use crate::error::CartError;
use crate::gateway::http::error_for_status;
use crate::gateway::wire::{Envelope, ProductsData};

const CATALOG_KEY: &str = "catalog";

/// Client for the product list endpoint.
#[derive(Clone)]
pub struct CatalogClient {
    inner: Arc<CatalogClientInner>,
}

struct CatalogClientInner {
    client: reqwest::Client,
    url: Url,
    cache: Cache<&'static str, Arc<Catalog>>,
}

impl std::fmt::Debug for CatalogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogClient")
            .field("url", &self.inner.url.as_str())
            .finish_non_exhaustive()
    }
}

impl CatalogClient {
    /// Create a catalog client for `config.catalog_url`.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Network` if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, CartError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let cache = Cache::builder()
            .max_capacity(1)
            .time_to_live(config.catalog_ttl)
            .build();

        Ok(Self {
            inner: Arc::new(CatalogClientInner {
                client,
                url: config.catalog_url.clone(),
                cache,
            }),
        })
    }

    /// Get the catalog, from cache when fresh.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body cannot be decoded.
    #[instrument(skip(self))]
    pub async fn fetch_catalog(&self) -> Result<Arc<Catalog>, CartError> {
        if let Some(catalog) = self.inner.cache.get(CATALOG_KEY).await {
            debug!("Cache hit for catalog");
            return Ok(catalog);
        }

        let response = self
            .inner
            .client
            .get(self.inner.url.clone())
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(error_for_status(status, &body));
        }

        let envelope: Envelope<ProductsData> = serde_json::from_str(&body)?;
        let catalog: Arc<Catalog> = Arc::new(
            envelope
                .data
                .products
                .into_iter()
                .map(CatalogProduct::from)
                .collect(),
        );
        debug!(products = catalog.len(), "Catalog loaded");

        self.inner.cache.insert(CATALOG_KEY, catalog.clone()).await;
        Ok(catalog)
    }

    /// Drop the cached catalog so the next fetch goes to the network.
    pub async fn invalidate(&self) {
        self.inner.cache.invalidate(CATALOG_KEY).await;
    }
}
