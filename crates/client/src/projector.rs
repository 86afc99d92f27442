//! Cart projector: derives the UI-facing view from the active replica.
//!
//! The guest and remote replicas never share a structure. The projector is
//! handed one [`CartSource`] and computes a fresh [`DerivedView`] from it.
//! Returning `None` means "not ready yet": the caller keeps the previous view.

use cartsync_core::{Catalog, DerivedView, GuestCart, RemoteCartSnapshot, ViewSource};
use rust_decimal::Decimal;

/// The replica a view is projected from.
#[derive(Debug, Clone, Copy)]
pub enum CartSource<'a> {
    /// Guest cart, priced against the catalog when it has loaded.
    GuestSourced {
        cart: &'a GuestCart,
        catalog: Option<&'a Catalog>,
    },
    /// Last snapshot returned by the server.
    RemoteSourced(&'a RemoteCartSnapshot),
}

/// Pick the active replica.
///
/// Returns `None` while authenticated but before the first snapshot has
/// arrived.
#[must_use]
pub const fn select_source<'a>(
    is_authenticated: bool,
    guest: &'a GuestCart,
    remote: Option<&'a RemoteCartSnapshot>,
    catalog: Option<&'a Catalog>,
) -> Option<CartSource<'a>> {
    if is_authenticated {
        match remote {
            Some(snapshot) => Some(CartSource::RemoteSourced(snapshot)),
            None => None,
        }
    } else {
        Some(CartSource::GuestSourced {
            cart: guest,
            catalog,
        })
    }
}

/// Project a view from `source`.
///
/// A non-empty guest cart is only projected once the catalog is available,
/// since totals use each product's current price.
#[must_use]
pub fn project(source: CartSource<'_>) -> Option<DerivedView> {
    match source {
        CartSource::GuestSourced { cart, catalog } => project_guest(cart, catalog),
        CartSource::RemoteSourced(snapshot) => Some(project_remote(snapshot)),
    }
}

fn project_guest(cart: &GuestCart, catalog: Option<&Catalog>) -> Option<DerivedView> {
    if cart.is_empty() {
        return Some(DerivedView {
            source: ViewSource::Guest,
            ..DerivedView::default()
        });
    }
    let catalog = catalog?;

    // Products missing from the catalog still count, but contribute no total
    let total = cart
        .lines()
        .filter_map(|line| {
            catalog
                .get(&line.product_id)
                .map(|product| product.price.line_total(line.quantity))
        })
        .fold(Decimal::ZERO, Decimal::saturating_add);

    Some(DerivedView {
        cart_items: cart.as_map().clone(),
        item_count: cart.item_count(),
        total,
        source: ViewSource::Guest,
    })
}

fn project_remote(snapshot: &RemoteCartSnapshot) -> DerivedView {
    let cart_items = snapshot.quantities();
    let item_count = cart_items.values().fold(0_u32, |acc, q| acc.saturating_add(*q));
    DerivedView {
        cart_items,
        item_count,
        total: snapshot.total,
        source: ViewSource::Remote,
    }
}
