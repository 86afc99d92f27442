//! Wire format of the cart and catalog resources.
//!
//! Success bodies wrap their payload in `{ "data": ... }`; failures carry
//! `{ "message": "..." }`. Missing totals and counts default to zero, and
//! lines whose product reference was not populated are dropped.

use cartsync_core::{CatalogProduct, Price, ProductId, ProductRef, RemoteCartSnapshot, RemoteLine};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// `{ "data": T }`
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// `data` of a cart response.
#[derive(Debug, Deserialize)]
pub struct CartData {
    pub cart: WireCart,
}

/// `data` of a catalog response.
#[derive(Debug, Deserialize)]
pub struct ProductsData {
    #[serde(default)]
    pub products: Vec<WireProduct>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCart {
    #[serde(default)]
    pub items: Vec<WireLine>,
    #[serde(default)]
    pub total: Decimal,
    #[serde(default)]
    pub item_count: u32,
}

#[derive(Debug, Deserialize)]
pub struct WireLine {
    #[serde(default)]
    pub product: Option<WireProduct>,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct WireProduct {
    #[serde(rename = "_id")]
    pub id: ProductId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub stock: u32,
}

/// Failure body.
#[derive(Debug, Deserialize)]
pub struct ErrorPayload {
    pub message: Option<String>,
}

/// Body of `POST /cart/add`.
#[derive(Debug, Serialize)]
pub struct AddRequest<'a> {
    pub product: &'a ProductId,
    pub quantity: u32,
}

/// Body of `PATCH /cart/item/{id}`.
#[derive(Debug, Serialize)]
pub struct QuantityRequest {
    pub quantity: u32,
}

impl From<WireCart> for RemoteCartSnapshot {
    fn from(cart: WireCart) -> Self {
        let items = cart
            .items
            .into_iter()
            .filter_map(|line| {
                let Some(product) = line.product else {
                    warn!("Dropping cart line without a product reference");
                    return None;
                };
                (line.quantity > 0).then(|| RemoteLine {
                    product: ProductRef {
                        id: product.id,
                        name: product.name,
                        price: Price::new(product.price),
                    },
                    quantity: line.quantity,
                })
            })
            .collect();
        Self {
            items,
            total: cart.total,
            item_count: cart.item_count,
        }
    }
}

impl From<WireProduct> for CatalogProduct {
    fn from(product: WireProduct) -> Self {
        Self {
            id: product.id,
            name: product.name,
            price: Price::new(product.price),
            stock: product.stock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_cart_envelope() {
        let body = r#"{
            "success": true,
            "data": { "cart": {
                "items": [
                    { "product": { "_id": "p1", "name": "Tee", "price": 25, "stock": 4 }, "quantity": 2 },
                    { "product": null, "quantity": 1 }
                ],
                "total": 50,
                "itemCount": 2
            } }
        }"#;
        let envelope: Envelope<CartData> = serde_json::from_str(body).unwrap();
        let snapshot = RemoteCartSnapshot::from(envelope.data.cart);

        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.quantity(&ProductId::new("p1")), 2);
        assert_eq!(snapshot.total, Decimal::from(50));
        assert_eq!(snapshot.item_count, 2);
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let envelope: Envelope<CartData> = serde_json::from_str(r#"{"data":{"cart":{}}}"#).unwrap();
        let snapshot = RemoteCartSnapshot::from(envelope.data.cart);
        assert_eq!(snapshot, RemoteCartSnapshot::empty());
    }

    #[test]
    fn test_add_request_shape() {
        let id = ProductId::new("p1");
        let body = serde_json::to_value(AddRequest {
            product: &id,
            quantity: 2,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "product": "p1", "quantity": 2 }));
    }
}
