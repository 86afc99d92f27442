//! Integration tests for cartsync.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cartsync-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `gateway_http` - `HttpCartGateway` against the cart resource
//! - `engine_flows` - Guest persistence, login merge, logout, session loss, cross-tab events
//!
//! Every test starts its own [`FakeCartServer`]: an axum app on an ephemeral
//! port that implements the cart and catalog resources in memory. Each bearer
//! token is its own account cart. Prices are whole currency units.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

// =============================================================================
// FakeCartServer
// =============================================================================

/// In-process cart server.
pub struct FakeCartServer {
    addr: SocketAddr,
    state: ServerState,
    handle: JoinHandle<()>,
}

impl FakeCartServer {
    /// Bind to an ephemeral port and start serving.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot be bound.
    #[allow(clippy::unwrap_used)]
    pub async fn start() -> Self {
        let state = ServerState::default();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state.clone());

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Fake cart server stopped");
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// Base URL of the API, e.g. `http://127.0.0.1:40123/api`.
    #[must_use]
    pub fn api_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn add_product(&self, id: &str, name: &str, price: u32, stock: u32) {
        self.state.lock().products.insert(
            id.to_string(),
            Product {
                name: name.to_string(),
                price,
                stock,
            },
        );
    }

    /// Accept `token` as a signed-in account with an empty cart.
    pub fn issue_token(&self, token: &str) {
        let mut data = self.state.lock();
        data.tokens.insert(token.to_string());
        data.carts.entry(token.to_string()).or_default();
    }

    /// Reject `token` from now on, as if it expired.
    pub fn revoke_token(&self, token: &str) {
        self.state.lock().tokens.remove(token);
    }

    /// Put a line straight into an account cart.
    pub fn seed_line(&self, token: &str, product: &str, quantity: u32) {
        self.state
            .lock()
            .carts
            .entry(token.to_string())
            .or_default()
            .push((product.to_string(), quantity));
    }

    /// Quantity of `product` in the account cart of `token`.
    #[must_use]
    pub fn cart_quantity(&self, token: &str, product: &str) -> u32 {
        self.state
            .lock()
            .carts
            .get(token)
            .and_then(|lines| lines.iter().find(|(id, _)| id == product))
            .map_or(0, |(_, quantity)| *quantity)
    }

    /// Every cart request received, as `"METHOD /path"`.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }

    /// Fail the next authorized cart request with `status`.
    pub fn fail_next(&self, status: StatusCode, message: &str) {
        self.state.lock().fail_next = Some(ApiError {
            status,
            message: message.to_string(),
        });
    }
}

impl Drop for FakeCartServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone)]
struct Product {
    name: String,
    price: u32,
    stock: u32,
}

#[derive(Default)]
struct ServerData {
    products: BTreeMap<String, Product>,
    tokens: HashSet<String>,
    carts: HashMap<String, Vec<(String, u32)>>,
    requests: Vec<String>,
    fail_next: Option<ApiError>,
}

#[derive(Clone, Default)]
struct ServerState {
    inner: Arc<Mutex<ServerData>>,
}

impl ServerState {
    fn lock(&self) -> std::sync::MutexGuard<'_, ServerData> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Authenticate, apply `op` to the caller's cart, and answer with the full cart.
    fn cart_request(
        &self,
        headers: &HeaderMap,
        label: String,
        op: impl FnOnce(&mut ServerData, &str) -> Result<(), ApiError>,
    ) -> Response {
        let mut data = self.lock();
        data.requests.push(label);

        let token = match bearer(headers) {
            Some(token) if data.tokens.contains(token) => token.to_string(),
            _ => return ApiError::new(StatusCode::UNAUTHORIZED, "Not authorized").into_response(),
        };
        if let Some(err) = data.fail_next.take() {
            return err.into_response();
        }

        match op(&mut *data, &token) {
            Ok(()) => Json(cart_body(&data, &token)).into_response(),
            Err(e) => e.into_response(),
        }
    }
}

#[derive(Debug, Clone)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: &str) -> Self {
        Self {
            status,
            message: message.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "success": false, "message": self.message })),
        )
            .into_response()
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn cart_body(data: &ServerData, token: &str) -> Value {
    let lines = data.carts.get(token).map(Vec::as_slice).unwrap_or_default();
    let mut total = 0_u64;
    let mut item_count = 0_u32;
    let items: Vec<Value> = lines
        .iter()
        .map(|(id, quantity)| {
            let product = data.products.get(id);
            let price = product.map_or(0, |p| p.price);
            total += u64::from(price) * u64::from(*quantity);
            item_count += quantity;
            json!({
                "product": {
                    "_id": id,
                    "name": product.map_or("", |p| p.name.as_str()),
                    "price": price,
                    "stock": product.map_or(0, |p| p.stock),
                },
                "quantity": quantity,
            })
        })
        .collect();

    json!({
        "success": true,
        "data": { "cart": { "items": items, "total": total, "itemCount": item_count } }
    })
}

// =============================================================================
// Routes
// =============================================================================

fn router(state: ServerState) -> Router {
    let api = Router::new()
        .route("/cart", get(show_cart))
        .route("/cart/add", post(add_item))
        .route("/cart/item/{id}", patch(set_item).delete(decrease_item))
        .route("/cart/remove/{id}", delete(remove_item))
        .route("/cart/clear", delete(clear_cart))
        .route("/admin/products", get(list_products))
        .with_state(state);

    Router::new().nest("/api", api)
}

#[derive(Debug, Deserialize)]
struct AddBody {
    product: String,
    #[serde(default = "one")]
    quantity: u32,
}

const fn one() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct QuantityBody {
    quantity: u32,
}

fn stock_of(data: &ServerData, product: &str) -> Result<u32, ApiError> {
    data.products
        .get(product)
        .map(|p| p.stock)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Product not found"))
}

fn line_not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "Item not found in cart")
}

async fn show_cart(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    state.cart_request(&headers, "GET /cart".to_string(), |_, _| Ok(()))
}

async fn add_item(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<AddBody>,
) -> Response {
    state.cart_request(&headers, "POST /cart/add".to_string(), |data, token| {
        if body.quantity == 0 {
            return Err(ApiError::new(StatusCode::BAD_REQUEST, "Invalid quantity"));
        }
        let stock = stock_of(data, &body.product)?;
        if stock == 0 {
            return Err(ApiError::new(StatusCode::BAD_REQUEST, "Out of stock"));
        }
        let cart = data.carts.entry(token.to_string()).or_default();
        match cart.iter_mut().find(|(id, _)| *id == body.product) {
            Some((_, quantity)) => *quantity = (*quantity + body.quantity).min(stock),
            None => cart.push((body.product.clone(), body.quantity.min(stock))),
        }
        Ok(())
    })
}

async fn set_item(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<QuantityBody>,
) -> Response {
    state.cart_request(&headers, format!("PATCH /cart/item/{id}"), |data, token| {
        if body.quantity == 0 {
            return Err(ApiError::new(StatusCode::BAD_REQUEST, "Invalid quantity"));
        }
        let stock = stock_of(data, &id)?;
        let cart = data.carts.entry(token.to_string()).or_default();
        let (_, quantity) = cart
            .iter_mut()
            .find(|(line_id, _)| *line_id == id)
            .ok_or_else(line_not_found)?;
        *quantity = body.quantity.min(stock);
        Ok(())
    })
}

async fn decrease_item(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    state.cart_request(&headers, format!("DELETE /cart/item/{id}"), |data, token| {
        let cart = data.carts.entry(token.to_string()).or_default();
        let (_, quantity) = cart
            .iter_mut()
            .find(|(line_id, _)| *line_id == id)
            .ok_or_else(line_not_found)?;
        *quantity -= 1;
        cart.retain(|(_, q)| *q > 0);
        Ok(())
    })
}

async fn remove_item(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    state.cart_request(&headers, format!("DELETE /cart/remove/{id}"), |data, token| {
        let cart = data.carts.entry(token.to_string()).or_default();
        let before = cart.len();
        cart.retain(|(line_id, _)| *line_id != id);
        if cart.len() == before {
            return Err(line_not_found());
        }
        Ok(())
    })
}

async fn clear_cart(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    state.cart_request(&headers, "DELETE /cart/clear".to_string(), |data, token| {
        data.carts.insert(token.to_string(), Vec::new());
        Ok(())
    })
}

async fn list_products(State(state): State<ServerState>) -> Json<Value> {
    let data = state.lock();
    let products: Vec<Value> = data
        .products
        .iter()
        .map(|(id, p)| json!({ "_id": id, "name": p.name, "price": p.price, "stock": p.stock }))
        .collect();
    Json(json!({ "success": true, "data": { "products": products } }))
}
