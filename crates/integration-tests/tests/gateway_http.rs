//! `HttpCartGateway` and `CatalogClient` against the fake cart server.

use std::sync::Arc;

use cartsync_client::catalog::CatalogClient;
use cartsync_client::config::ClientConfig;
use cartsync_client::error::CartError;
use cartsync_client::gateway::{HttpCartGateway, RemoteCartGateway};
use cartsync_client::storage::{MemoryTokenStore, TokenStore};
use cartsync_core::ProductId;
use cartsync_integration_tests::FakeCartServer;
use rust_decimal::Decimal;

fn pid(s: &str) -> ProductId {
    ProductId::new(s)
}

fn config(server: &FakeCartServer) -> ClientConfig {
    ClientConfig::for_api(&server.api_url(), ".").unwrap()
}

fn gateway(server: &FakeCartServer, token: Option<&str>) -> HttpCartGateway {
    let tokens: Arc<dyn TokenStore> = Arc::new(
        token.map_or_else(MemoryTokenStore::default, MemoryTokenStore::with_token),
    );
    HttpCartGateway::new(&config(server), tokens).unwrap()
}

async fn signed_in_server() -> FakeCartServer {
    let server = FakeCartServer::start().await;
    server.add_product("p1", "Tee", 25, 3);
    server.add_product("p2", "Cap", 10, 5);
    server.issue_token("tok");
    server
}

// =============================================================================
// Cart Resource
// =============================================================================

#[tokio::test]
async fn test_fetch_empty_cart() {
    let server = signed_in_server().await;
    let snapshot = gateway(&server, Some("tok")).fetch().await.unwrap();

    assert!(snapshot.is_empty());
    assert_eq!(snapshot.item_count, 0);
    assert_eq!(snapshot.total, Decimal::ZERO);
    assert_eq!(server.requests(), vec!["GET /cart"]);
}

#[tokio::test]
async fn test_add_returns_full_snapshot_clamped_to_stock() {
    let server = signed_in_server().await;
    let gw = gateway(&server, Some("tok"));

    let snapshot = gw.add(&pid("p1"), 2).await.unwrap();
    assert_eq!(snapshot.quantity(&pid("p1")), 2);
    assert_eq!(snapshot.total, Decimal::from(50));
    assert_eq!(snapshot.items[0].product.name, "Tee");

    let snapshot = gw.add(&pid("p1"), 5).await.unwrap();
    assert_eq!(snapshot.quantity(&pid("p1")), 3);
    assert_eq!(snapshot.item_count, 3);
}

#[tokio::test]
async fn test_decrease_at_one_deletes_line() {
    let server = signed_in_server().await;
    server.seed_line("tok", "p1", 1);
    server.seed_line("tok", "p2", 1);
    let gw = gateway(&server, Some("tok"));

    let snapshot = gw.decrease(&pid("p2")).await.unwrap();

    assert_eq!(snapshot.quantity(&pid("p2")), 0);
    assert_eq!(snapshot.items.len(), 1);
    assert_eq!(snapshot.item_count, 1);
}

#[tokio::test]
async fn test_set_quantity_then_remove_line() {
    let server = signed_in_server().await;
    server.seed_line("tok", "p2", 1);
    let gw = gateway(&server, Some("tok"));

    let snapshot = gw.set_quantity(&pid("p2"), 4).await.unwrap();
    assert_eq!(snapshot.quantity(&pid("p2")), 4);

    let snapshot = gw.remove_line(&pid("p2")).await.unwrap();
    assert!(snapshot.is_empty());

    let err = gw.remove_line(&pid("p2")).await.unwrap_err();
    assert!(err.is_already_satisfied());
}

#[tokio::test]
async fn test_zero_quantity_never_sent() {
    let server = signed_in_server().await;
    let gw = gateway(&server, Some("tok"));

    let err = gw.set_quantity(&pid("p1"), 0).await.unwrap_err();
    assert!(matches!(err, CartError::Validation(_)));
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn test_clear_returns_empty_snapshot() {
    let server = signed_in_server().await;
    server.seed_line("tok", "p1", 2);

    let snapshot = gateway(&server, Some("tok")).clear().await.unwrap();

    assert!(snapshot.is_empty());
    assert_eq!(server.cart_quantity("tok", "p1"), 0);
}

#[tokio::test]
async fn test_product_id_is_path_encoded() {
    let server = signed_in_server().await;
    server.add_product("summer tee/blue", "Blue Tee", 30, 2);
    server.seed_line("tok", "summer tee/blue", 1);

    let snapshot = gateway(&server, Some("tok"))
        .set_quantity(&pid("summer tee/blue"), 2)
        .await
        .unwrap();

    assert_eq!(snapshot.quantity(&pid("summer tee/blue")), 2);
}

// =============================================================================
// Error Mapping
// =============================================================================

#[tokio::test]
async fn test_missing_or_revoked_token_is_unauthorized() {
    let server = signed_in_server().await;

    let err = gateway(&server, None).fetch().await.unwrap_err();
    assert!(err.is_session_loss());

    server.revoke_token("tok");
    let err = gateway(&server, Some("tok")).fetch().await.unwrap_err();
    assert!(matches!(err, CartError::Unauthorized(ref m) if m == "Not authorized"));
}

#[tokio::test]
async fn test_validation_message_from_payload() {
    let server = signed_in_server().await;
    server.add_product("sold-out", "Sold Out", 5, 0);

    let err = gateway(&server, Some("tok"))
        .add(&pid("sold-out"), 1)
        .await
        .unwrap_err();

    assert!(matches!(err, CartError::Validation(ref m) if m == "Out of stock"));
    assert_eq!(err.notice().message, "Out of stock");
}

#[tokio::test]
async fn test_server_error_is_reportable() {
    let server = signed_in_server().await;
    server.fail_next(axum::http::StatusCode::BAD_GATEWAY, "upstream down");

    let err = gateway(&server, Some("tok")).fetch().await.unwrap_err();

    assert!(matches!(err, CartError::Server { status: 502, .. }));
    assert!(err.is_reportable());
}

#[tokio::test]
async fn test_unreachable_server_is_network_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let config = ClientConfig::for_api(&format!("http://{addr}/api"), ".").unwrap();
    let gw = HttpCartGateway::new(&config, Arc::new(MemoryTokenStore::with_token("tok"))).unwrap();

    let err = gw.fetch().await.unwrap_err();

    assert!(matches!(err, CartError::Network(_)));
    assert!(!err.is_session_loss());
    assert!(!err.is_reportable());
    assert_eq!(
        err.notice().message,
        "Could not reach the cart service, please try again"
    );
}

// =============================================================================
// Catalog
// =============================================================================

#[tokio::test]
async fn test_catalog_is_cached_until_invalidated() {
    let server = signed_in_server().await;
    let client = CatalogClient::new(&config(&server)).unwrap();

    let catalog = client.fetch_catalog().await.unwrap();
    assert_eq!(catalog.len(), 2);
    assert_eq!(catalog.stock(&pid("p1")), Some(3));
    assert_eq!(
        catalog.get(&pid("p2")).unwrap().price.amount(),
        Decimal::from(10)
    );

    server.add_product("p3", "Socks", 4, 9);
    assert_eq!(client.fetch_catalog().await.unwrap().len(), 2);

    client.invalidate().await;
    assert_eq!(client.fetch_catalog().await.unwrap().len(), 3);
}
