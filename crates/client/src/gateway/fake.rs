//! In-memory gateway used by unit tests.
//!
//! Behaves like the real cart resource (stock clamp, delete at zero, full
//! snapshot on every call) and records every call so tests can assert on the
//! exact sequence of network operations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use cartsync_core::{Price, ProductId, ProductRef, RemoteCartSnapshot, RemoteLine};
use rust_decimal::Decimal;
use tokio::sync::Notify;

use super::{RemoteCartGateway, ensure_positive};
use crate::error::CartError;

/// A recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Fetch,
    Add(ProductId, u32),
    SetQuantity(ProductId, u32),
    Decrease(ProductId),
    RemoveLine(ProductId),
    Clear,
}

/// Failure to inject on matching calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Unauthorized,
    Validation,
    Server,
    /// The request never reached the server.
    Network,
}

impl Failure {
    fn into_error(self) -> CartError {
        match self {
            Self::Unauthorized => CartError::Unauthorized("jwt expired".to_string()),
            Self::Validation => CartError::Validation("rejected".to_string()),
            Self::Server => CartError::Server {
                status: 500,
                message: "boom".to_string(),
            },
            Self::Network => CartError::Network(transport_error()),
        }
    }
}

/// A real `reqwest::Error`: a request that cannot even be built.
fn transport_error() -> reqwest::Error {
    reqwest::Client::new()
        .get("not a url")
        .build()
        .unwrap_err()
}

#[derive(Default)]
struct FakeState {
    lines: Vec<(ProductId, u32)>,
    prices: HashMap<ProductId, Decimal>,
    stock: HashMap<ProductId, u32>,
    calls: Vec<Call>,
    fail_fetch: Option<Failure>,
    fail_product: HashMap<ProductId, Failure>,
}

/// Recording in-memory cart.
#[derive(Clone, Default)]
pub struct FakeGateway {
    state: Arc<Mutex<FakeState>>,
    gate: Arc<Mutex<Option<Arc<Notify>>>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a product with a price and stock.
    pub fn with_product(self, id: &str, price: i64, stock: u32) -> Self {
        {
            let mut state = self.lock();
            state.prices.insert(ProductId::new(id), Decimal::from(price));
            state.stock.insert(ProductId::new(id), stock);
        }
        self
    }

    /// Seed a server-side line.
    pub fn with_line(self, id: &str, quantity: u32) -> Self {
        self.lock().lines.push((ProductId::new(id), quantity));
        self
    }

    pub fn fail_fetch(&self, failure: Failure) {
        self.lock().fail_fetch = Some(failure);
    }

    pub fn fail_product(&self, id: &str, failure: Failure) {
        self.lock().fail_product.insert(ProductId::new(id), failure);
    }

    /// Make every subsequent call wait until the returned `Notify` fires.
    pub fn hold(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) = Some(notify.clone());
        notify
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn snapshot(&self) -> RemoteCartSnapshot {
        build_snapshot(&self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn wait_gate(&self) {
        let gate = self
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(notify) = gate {
            notify.notified().await;
        }
    }

    async fn apply(
        &self,
        call: Call,
        mutate: impl FnOnce(&mut FakeState) -> Result<(), CartError> + Send,
    ) -> Result<RemoteCartSnapshot, CartError> {
        self.wait_gate().await;
        let mut state = self.lock();
        state.calls.push(call.clone());
        let failure = match &call {
            Call::Fetch => state.fail_fetch,
            Call::Add(id, _)
            | Call::SetQuantity(id, _)
            | Call::Decrease(id)
            | Call::RemoveLine(id) => state.fail_product.get(id).copied(),
            Call::Clear => None,
        };
        if let Some(failure) = failure {
            return Err(failure.into_error());
        }
        mutate(&mut state)?;
        Ok(build_snapshot(&state))
    }
}

fn build_snapshot(state: &FakeState) -> RemoteCartSnapshot {
    let items: Vec<RemoteLine> = state
        .lines
        .iter()
        .map(|(id, quantity)| RemoteLine {
            product: ProductRef {
                id: id.clone(),
                name: format!("Product {id}"),
                price: Price::new(state.prices.get(id).copied().unwrap_or_default()),
            },
            quantity: *quantity,
        })
        .collect();
    let total = items
        .iter()
        .map(|line| line.product.price.line_total(line.quantity))
        .sum();
    let item_count = items.iter().map(|line| line.quantity).sum();
    RemoteCartSnapshot {
        items,
        total,
        item_count,
    }
}

fn line_mut<'a>(state: &'a mut FakeState, id: &ProductId) -> Option<&'a mut u32> {
    state
        .lines
        .iter_mut()
        .find(|(line_id, _)| line_id == id)
        .map(|(_, quantity)| quantity)
}

fn clamp_to_stock(state: &FakeState, id: &ProductId, quantity: u32) -> u32 {
    state
        .stock
        .get(id)
        .map_or(quantity, |stock| quantity.min(*stock))
}

impl RemoteCartGateway for FakeGateway {
    async fn fetch(&self) -> Result<RemoteCartSnapshot, CartError> {
        self.apply(Call::Fetch, |_| Ok(())).await
    }

    async fn add(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<RemoteCartSnapshot, CartError> {
        let id = product_id.clone();
        self.apply(Call::Add(id.clone(), quantity), move |state| {
            ensure_positive(quantity)?;
            let current = line_mut(state, &id).map_or(0, |q| *q);
            let wanted = clamp_to_stock(state, &id, current + quantity);
            match line_mut(state, &id) {
                Some(existing) => *existing = wanted,
                None if wanted > 0 => state.lines.push((id, wanted)),
                None => {}
            }
            Ok(())
        })
        .await
    }

    async fn set_quantity(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<RemoteCartSnapshot, CartError> {
        let id = product_id.clone();
        self.apply(Call::SetQuantity(id.clone(), quantity), move |state| {
            ensure_positive(quantity)?;
            let wanted = clamp_to_stock(state, &id, quantity);
            match line_mut(state, &id) {
                Some(existing) => *existing = wanted,
                None => return Err(CartError::NotFound(id.to_string())),
            }
            Ok(())
        })
        .await
    }

    async fn decrease(&self, product_id: &ProductId) -> Result<RemoteCartSnapshot, CartError> {
        let id = product_id.clone();
        self.apply(Call::Decrease(id.clone()), move |state| {
            let Some(quantity) = line_mut(state, &id) else {
                return Err(CartError::NotFound(id.to_string()));
            };
            *quantity -= 1;
            state.lines.retain(|(_, q)| *q > 0);
            Ok(())
        })
        .await
    }

    async fn remove_line(&self, product_id: &ProductId) -> Result<RemoteCartSnapshot, CartError> {
        let id = product_id.clone();
        self.apply(Call::RemoveLine(id.clone()), move |state| {
            let before = state.lines.len();
            state.lines.retain(|(line_id, _)| line_id != &id);
            if state.lines.len() == before {
                return Err(CartError::NotFound(id.to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<RemoteCartSnapshot, CartError> {
        self.apply(Call::Clear, |state| {
            state.lines.clear();
            Ok(())
        })
        .await
    }
}
