//! Core types for cartsync.
//!
//! This module provides type-safe wrappers for the cart domain.

pub mod cart;
pub mod catalog;
pub mod id;
pub mod price;
pub mod view;

pub use cart::{CartLine, GuestCart, ProductRef, RemoteCartSnapshot, RemoteLine};
pub use catalog::{Catalog, CatalogProduct};
pub use id::*;
pub use price::Price;
pub use view::{DerivedView, ViewSource};
