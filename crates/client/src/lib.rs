//! Cartsync client library.
//!
//! The cart synchronization engine: a persisted guest cart, a typed gateway to
//! the server cart, and the login merge that reconciles the two. The
//! [`engine::CartEngine`] wires the components together and exposes the
//! [`dispatcher::CartDispatcher`] as the UI-facing surface.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod guest;
pub mod merge;
pub mod projector;
pub mod session;
pub mod state;
pub mod storage;
