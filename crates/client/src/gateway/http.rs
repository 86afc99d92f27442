//! HTTP implementation of the remote cart gateway.
//!
//! Uses `reqwest` with a per-request timeout. The bearer token is read from
//! the token store on every request, so a token change made elsewhere is
//! picked up without rebuilding the client.

use std::sync::Arc;

use cartsync_core::{ProductId, RemoteCartSnapshot};
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use tracing::{debug, instrument};
use url::Url;

use super::wire::{AddRequest, CartData, Envelope, ErrorPayload, QuantityRequest};
use super::{RemoteCartGateway, ensure_positive};
use crate::config::ClientConfig;
use crate::error::CartError;
use crate::storage::TokenStore;

/// Longest body excerpt kept in logs and error messages.
const BODY_EXCERPT_CHARS: usize = 200;

// =============================================================================
// HttpCartGateway
// =============================================================================

/// Client for the `/cart` REST resource.
#[derive(Clone)]
pub struct HttpCartGateway {
    inner: Arc<HttpCartGatewayInner>,
}

struct HttpCartGatewayInner {
    client: reqwest::Client,
    base: Url,
    tokens: Arc<dyn TokenStore>,
}

impl std::fmt::Debug for HttpCartGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCartGateway")
            .field("base", &self.inner.base.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpCartGateway {
    /// Create a gateway for the API at `config.api_url`.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Network` if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig, tokens: Arc<dyn TokenStore>) -> Result<Self, CartError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(HttpCartGatewayInner {
                client,
                base: config.api_url.clone(),
                tokens,
            }),
        })
    }

    /// Build `{base}/{segments...}`, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.inner.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Start a request, attaching the bearer token when one is present.
    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let builder = self
            .inner
            .client
            .request(method, self.endpoint(segments))
            .header("Accept", "application/json");
        match self.inner.tokens.token() {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    /// Send a request and decode the cart snapshot from the response.
    async fn execute(&self, builder: RequestBuilder) -> Result<RemoteCartSnapshot, CartError> {
        let response = builder.send().await?;
        let status = response.status();

        // Get response body as text first for better error diagnostics
        let body = response.text().await?;

        if !status.is_success() {
            return Err(error_for_status(status, &body));
        }

        let envelope: Envelope<CartData> = serde_json::from_str(&body).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %excerpt(&body),
                "Failed to parse cart response"
            );
            CartError::Decode(e)
        })?;

        let snapshot = RemoteCartSnapshot::from(envelope.data.cart);
        debug!(
            lines = snapshot.items.len(),
            item_count = snapshot.item_count,
            "Cart snapshot received"
        );
        Ok(snapshot)
    }
}

impl RemoteCartGateway for HttpCartGateway {
    #[instrument(skip(self))]
    async fn fetch(&self) -> Result<RemoteCartSnapshot, CartError> {
        self.execute(self.request(Method::GET, &["cart"])).await
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    async fn add(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<RemoteCartSnapshot, CartError> {
        ensure_positive(quantity)?;
        let builder = self
            .request(Method::POST, &["cart", "add"])
            .json(&AddRequest {
                product: product_id,
                quantity,
            });
        self.execute(builder).await
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    async fn set_quantity(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<RemoteCartSnapshot, CartError> {
        ensure_positive(quantity)?;
        let builder = self
            .request(Method::PATCH, &["cart", "item", product_id.as_str()])
            .json(&QuantityRequest { quantity });
        self.execute(builder).await
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    async fn decrease(&self, product_id: &ProductId) -> Result<RemoteCartSnapshot, CartError> {
        self.execute(self.request(Method::DELETE, &["cart", "item", product_id.as_str()]))
            .await
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    async fn remove_line(&self, product_id: &ProductId) -> Result<RemoteCartSnapshot, CartError> {
        self.execute(self.request(Method::DELETE, &["cart", "remove", product_id.as_str()]))
            .await
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<RemoteCartSnapshot, CartError> {
        self.execute(self.request(Method::DELETE, &["cart", "clear"]))
            .await
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Map a non-success response to a typed error.
pub(crate) fn error_for_status(status: StatusCode, body: &str) -> CartError {
    let message = serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .and_then(|payload| payload.message)
        .unwrap_or_else(|| excerpt(body));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CartError::Unauthorized(message),
        StatusCode::NOT_FOUND => CartError::NotFound(message),
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            CartError::Validation(message)
        }
        _ => {
            tracing::error!(
                status = %status,
                body = %excerpt(body),
                "Cart API returned non-success status"
            );
            CartError::Server {
                status: status.as_u16(),
                message,
            }
        }
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_CHARS).collect()
}
