//! Cartsync Core - Shared cart types.
//!
//! This crate provides the data model shared by the cartsync components:
//! - `client` - The cart synchronization engine
//! - `cli` - The `cartctl` command-line front end
//! - `integration-tests` - The fake cart server used in end-to-end tests
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no HTTP
//! clients, no persistence. Both the guest cart and the remote snapshot live
//! here so the projector can be tested without any runtime.
//!
//! # Modules
//!
//! - [`types`] - Product IDs, prices, cart replicas, catalog, and the derived view

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
