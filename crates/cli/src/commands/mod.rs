//! Command implementations and shared output.

pub mod cart;
pub mod session;

use cartsync_client::config::ClientConfig;
use cartsync_client::engine::CartEngine;
use cartsync_client::error::{CartError, NoticeLevel};
use cartsync_client::gateway::HttpCartGateway;
use cartsync_client::session::SessionBus;
use cartsync_client::storage::StorageError;
use cartsync_core::IdError;
use serde::Serialize;
use thiserror::Error;

/// The engine as used by every command.
pub type Engine = CartEngine<HttpCartGateway>;

/// Errors that end a `cartctl` invocation.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid product ID: {0}")]
    InvalidProductId(#[from] IdError),

    #[error("No stock known for {0}; pass --stock")]
    UnknownStock(String),

    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("JSON output failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The engine refused the operation; the notice text explains why.
    #[error("{0}")]
    Rejected(String),
}

/// Build the engine from `config` and run page-load initialization.
pub async fn open_engine(config: &ClientConfig) -> Result<Engine, CliError> {
    let engine = CartEngine::from_config(config, SessionBus::new())?;
    engine.bootstrap().await;
    Ok(engine)
}

#[derive(Serialize)]
struct Output<'a> {
    phase: String,
    view: &'a cartsync_core::DerivedView,
    notice: Option<&'a cartsync_client::error::Notice>,
}

/// Print the derived view and any pending notice.
#[allow(clippy::print_stdout)]
pub fn render(engine: &Engine, json: bool) -> Result<(), CliError> {
    let snapshot = engine.dispatcher().snapshot();
    let notice = engine.dispatcher().take_notice();

    if json {
        let output = Output {
            phase: snapshot.phase.to_string(),
            view: &snapshot.view,
            notice: notice.as_ref(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Cart ({})", snapshot.phase);
    if snapshot.view.is_empty() {
        println!("  (empty)");
    }
    let catalog = snapshot.catalog.as_deref();
    for (product_id, quantity) in &snapshot.view.cart_items {
        let name = catalog
            .and_then(|c| c.get(product_id))
            .map_or("", |p| p.name.as_str());
        println!("  {:<26} x{quantity:<4} {name}", product_id.as_str());
    }
    println!("Items: {}", snapshot.view.item_count);
    println!("Total: {:.2}", snapshot.view.total);

    if let Some(notice) = notice {
        let tag = match notice.level {
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        };
        println!("[{tag}] {}", notice.message);
    }
    Ok(())
}
