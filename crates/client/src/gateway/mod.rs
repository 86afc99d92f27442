//! Remote cart gateway: typed access to the server-authoritative cart.
//!
//! # Architecture
//!
//! - One method per cart mutation, each a single network round trip
//! - Every successful call returns the full [`RemoteCartSnapshot`]
//! - Failures surface as [`CartError`]; callers never patch a snapshot locally
//!
//! The trait exists so the merge coordinator and dispatcher can be exercised
//! against an in-memory cart. [`HttpCartGateway`] is the production
//! implementation.

use std::future::Future;

use cartsync_core::{ProductId, RemoteCartSnapshot};

use crate::error::CartError;

#[cfg(test)]
pub(crate) mod fake;
pub(crate) mod http;
pub(crate) mod wire;

pub use http::HttpCartGateway;

/// Operations on the authenticated user's server-side cart.
pub trait RemoteCartGateway: Send + Sync {
    /// Fetch the current cart.
    fn fetch(&self) -> impl Future<Output = Result<RemoteCartSnapshot, CartError>> + Send;

    /// Add `quantity` units of a product (the server clamps to stock).
    fn add(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> impl Future<Output = Result<RemoteCartSnapshot, CartError>> + Send;

    /// Set an absolute quantity. `quantity` must be at least 1.
    fn set_quantity(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> impl Future<Output = Result<RemoteCartSnapshot, CartError>> + Send;

    /// Decrement by one; the server deletes the line at zero.
    fn decrease(
        &self,
        product_id: &ProductId,
    ) -> impl Future<Output = Result<RemoteCartSnapshot, CartError>> + Send;

    /// Delete the line regardless of quantity.
    fn remove_line(
        &self,
        product_id: &ProductId,
    ) -> impl Future<Output = Result<RemoteCartSnapshot, CartError>> + Send;

    /// Empty the cart.
    fn clear(&self) -> impl Future<Output = Result<RemoteCartSnapshot, CartError>> + Send;
}

/// Reject a zero absolute quantity before it reaches the network.
pub(crate) fn ensure_positive(quantity: u32) -> Result<(), CartError> {
    if quantity == 0 {
        return Err(CartError::Validation(
            "quantity must be at least 1".to_string(),
        ));
    }
    Ok(())
}
