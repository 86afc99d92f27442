//! The UI-facing derived view.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::ProductId;

/// Which replica a view was projected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ViewSource {
    /// Nothing projected yet.
    #[default]
    Empty,
    /// Projected from the guest cart and the catalog.
    Guest,
    /// Projected from the remote snapshot.
    Remote,
}

/// Read-only projection of the active cart.
///
/// Always recomputed, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedView {
    /// Quantity by product.
    pub cart_items: BTreeMap<ProductId, u32>,
    /// Sum of quantities.
    pub item_count: u32,
    /// Sum of quantity times current unit price.
    pub total: Decimal,
    /// Replica this view came from.
    pub source: ViewSource,
}

impl DerivedView {
    /// Quantity shown for `product_id` (0 when absent).
    #[must_use]
    pub fn quantity(&self, product_id: &ProductId) -> u32 {
        self.cart_items.get(product_id).copied().unwrap_or(0)
    }

    /// Whether the view shows an empty cart.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cart_items.is_empty()
    }
}
