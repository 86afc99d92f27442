//! Cart operation commands.
//!
//! Each command resolves its arguments and hands off to the dispatcher, which
//! routes to the guest cart or the account cart.

use cartsync_client::dispatcher::Outcome;
use cartsync_core::ProductId;

use super::{CliError, Engine};

/// Add one unit of `product`.
pub async fn add(engine: &Engine, product: &str, stock: Option<u32>) -> Result<Outcome, CliError> {
    let product_id = ProductId::parse(product)?;
    let stock = resolve_stock(engine, &product_id, stock)?;
    Ok(engine.dispatcher().add(&product_id, stock).await)
}

pub async fn decrease(engine: &Engine, product: &str) -> Result<Outcome, CliError> {
    let product_id = ProductId::parse(product)?;
    Ok(engine.dispatcher().decrease(&product_id).await)
}

pub async fn delete(engine: &Engine, product: &str) -> Result<Outcome, CliError> {
    let product_id = ProductId::parse(product)?;
    Ok(engine.dispatcher().delete(&product_id).await)
}

/// Set an absolute quantity; 0 removes the line and needs no stock.
pub async fn set(
    engine: &Engine,
    product: &str,
    quantity: u32,
    stock: Option<u32>,
) -> Result<Outcome, CliError> {
    let product_id = ProductId::parse(product)?;
    let stock = if quantity == 0 {
        0
    } else {
        resolve_stock(engine, &product_id, stock)?
    };
    Ok(engine
        .dispatcher()
        .set_quantity(&product_id, quantity, stock)
        .await)
}

/// An explicit `--stock` wins over the catalog.
fn resolve_stock(
    engine: &Engine,
    product_id: &ProductId,
    explicit: Option<u32>,
) -> Result<u32, CliError> {
    explicit
        .or_else(|| engine.stock_for(product_id))
        .ok_or_else(|| CliError::UnknownStock(product_id.to_string()))
}
