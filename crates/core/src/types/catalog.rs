//! Read-only product catalog used for guest pricing and stock ceilings.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::id::ProductId;
use super::price::Price;

/// Catalog entry: the fields the cart engine needs from a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProduct {
    /// Product ID.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Current unit price.
    pub price: Price,
    /// Units available for sale.
    pub stock: u32,
}

/// The loaded product catalog, indexed by ID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    products: HashMap<ProductId, CatalogProduct>,
}

impl Catalog {
    /// Look up a product.
    #[must_use]
    pub fn get(&self, id: &ProductId) -> Option<&CatalogProduct> {
        self.products.get(id)
    }

    /// Current stock for a product, if it is in the catalog.
    #[must_use]
    pub fn stock(&self, id: &ProductId) -> Option<u32> {
        self.products.get(id).map(|p| p.stock)
    }

    /// Number of products.
    #[must_use]
    pub fn len(&self) -> usize {
        self.products.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Iterate over all products (unordered).
    pub fn iter(&self) -> impl Iterator<Item = &CatalogProduct> {
        self.products.values()
    }
}

impl FromIterator<CatalogProduct> for Catalog {
    fn from_iter<T: IntoIterator<Item = CatalogProduct>>(iter: T) -> Self {
        Self {
            products: iter.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }
}
