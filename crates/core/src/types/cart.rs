//! The two cart replicas: the guest cart and the remote snapshot.
//!
//! [`GuestCart`] is the client-owned replica for visitors without a session.
//! [`RemoteCartSnapshot`] is the server-authoritative replica, replaced whole
//! on every response and never edited field by field.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::ProductId;
use super::price::Price;

// =============================================================================
// Guest Cart
// =============================================================================

/// A single `productId -> quantity` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Product this line refers to.
    pub product_id: ProductId,
    /// Quantity, always at least 1.
    pub quantity: u32,
}

/// Guest cart: a map of product to quantity.
///
/// Invariant: no entry ever has quantity 0. Entries that reach 0 are removed,
/// and zero entries found while deserializing are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<ProductId, u32>", into = "BTreeMap<ProductId, u32>")]
pub struct GuestCart {
    items: BTreeMap<ProductId, u32>,
}

impl GuestCart {
    /// Create an empty guest cart.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }

    /// Increment the quantity for `product_id` by one, inserting it at 1.
    ///
    /// Returns the new quantity.
    pub fn add(&mut self, product_id: &ProductId) -> u32 {
        let quantity = self.items.entry(product_id.clone()).or_insert(0);
        *quantity = quantity.saturating_add(1);
        *quantity
    }

    /// Decrement the quantity for `product_id` by one, deleting it at 0.
    ///
    /// Absent products are a no-op. Returns the remaining quantity.
    pub fn remove(&mut self, product_id: &ProductId) -> u32 {
        let Some(quantity) = self.items.get_mut(product_id) else {
            return 0;
        };
        *quantity -= 1;
        let remaining = *quantity;
        if remaining == 0 {
            self.items.remove(product_id);
        }
        remaining
    }

    /// Remove `product_id` regardless of quantity.
    ///
    /// Returns the quantity that was removed, if any.
    pub fn delete(&mut self, product_id: &ProductId) -> Option<u32> {
        self.items.remove(product_id)
    }

    /// Set an absolute quantity. Zero deletes the entry.
    pub fn set(&mut self, product_id: &ProductId, quantity: u32) {
        if quantity == 0 {
            self.items.remove(product_id);
        } else {
            self.items.insert(product_id.clone(), quantity);
        }
    }

    /// Empty the cart.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Current quantity for `product_id` (0 when absent).
    #[must_use]
    pub fn quantity(&self, product_id: &ProductId) -> u32 {
        self.items.get(product_id).copied().unwrap_or(0)
    }

    /// Sum of all quantities.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.items.values().fold(0, |acc, q| acc.saturating_add(*q))
    }

    /// Number of distinct products.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the cart holds no products.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate lines in product order.
    pub fn lines(&self) -> impl Iterator<Item = CartLine> + '_ {
        self.items.iter().map(|(product_id, quantity)| CartLine {
            product_id: product_id.clone(),
            quantity: *quantity,
        })
    }

    /// Borrow the underlying map.
    #[must_use]
    pub const fn as_map(&self) -> &BTreeMap<ProductId, u32> {
        &self.items
    }
}

impl From<BTreeMap<ProductId, u32>> for GuestCart {
    fn from(mut items: BTreeMap<ProductId, u32>) -> Self {
        items.retain(|_, quantity| *quantity > 0);
        Self { items }
    }
}

impl From<GuestCart> for BTreeMap<ProductId, u32> {
    fn from(cart: GuestCart) -> Self {
        cart.items
    }
}

impl FromIterator<(ProductId, u32)> for GuestCart {
    fn from_iter<T: IntoIterator<Item = (ProductId, u32)>>(iter: T) -> Self {
        Self::from(iter.into_iter().collect::<BTreeMap<_, _>>())
    }
}

// =============================================================================
// Remote Snapshot
// =============================================================================

/// Product summary embedded in a remote cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRef {
    /// Product ID.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Current unit price as reported by the server.
    pub price: Price,
}

/// A line in the remote cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLine {
    /// Product summary.
    pub product: ProductRef,
    /// Quantity, always at least 1.
    pub quantity: u32,
}

/// The authenticated cart exactly as last returned by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCartSnapshot {
    /// Lines in server order.
    pub items: Vec<RemoteLine>,
    /// Cart total computed by the server.
    pub total: Decimal,
    /// Sum of quantities computed by the server.
    pub item_count: u32,
}

impl RemoteCartSnapshot {
    /// An empty snapshot (what the server returns after `clear`).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Quantity of `product_id` in this snapshot (0 when absent).
    #[must_use]
    pub fn quantity(&self, product_id: &ProductId) -> u32 {
        self.items
            .iter()
            .find(|line| &line.product.id == product_id)
            .map_or(0, |line| line.quantity)
    }

    /// Whether the snapshot has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Quantities keyed by product.
    #[must_use]
    pub fn quantities(&self) -> BTreeMap<ProductId, u32> {
        self.items
            .iter()
            .filter(|line| line.quantity > 0)
            .map(|line| (line.product.id.clone(), line.quantity))
            .collect()
    }
}
