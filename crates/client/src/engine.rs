//! Engine wiring: one store, one gateway, one session signal.
//!
//! [`CartEngine`] owns every component and exposes the dispatcher as the UI
//! surface. Session events from this process or from other tabs are handled
//! by a listener task that drives the merge coordinator.

use std::sync::Arc;

use cartsync_core::{Catalog, ProductId};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::CatalogClient;
use crate::config::ClientConfig;
use crate::dispatcher::CartDispatcher;
use crate::error::CartError;
use crate::gateway::{HttpCartGateway, RemoteCartGateway};
use crate::merge::MergeCoordinator;
use crate::session::{AuthSessionSignal, SessionBus, SessionEvent};
use crate::state::{CartAction, CartStore, SessionPhase};
use crate::storage::{FileGuestStorage, FileTokenStore, GuestStorage, TokenStore};

/// The assembled cart synchronization engine.
pub struct CartEngine<G> {
    store: CartStore,
    signal: AuthSessionSignal,
    coordinator: MergeCoordinator<G>,
    dispatcher: CartDispatcher<G>,
    catalog_client: Option<CatalogClient>,
}

impl<G> std::fmt::Debug for CartEngine<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartEngine")
            .field("store", &self.store)
            .field("catalog_client", &self.catalog_client)
            .finish_non_exhaustive()
    }
}

impl CartEngine<HttpCartGateway> {
    /// Build an engine persisting to `config.state_dir` and talking HTTP.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Network` if an HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig, bus: SessionBus) -> Result<Self, CartError> {
        let guest_storage: Arc<dyn GuestStorage> =
            Arc::new(FileGuestStorage::new(config.guest_cart_path()));
        let tokens: Arc<dyn TokenStore> = Arc::new(FileTokenStore::new(config.token_path()));
        let gateway = HttpCartGateway::new(config, tokens.clone())?;
        let catalog_client = CatalogClient::new(config)?;

        Ok(Self::new(gateway, guest_storage, tokens, bus).with_catalog_client(catalog_client))
    }
}

impl<G: RemoteCartGateway + 'static> CartEngine<G> {
    pub fn new(
        gateway: G,
        guest_storage: Arc<dyn GuestStorage>,
        tokens: Arc<dyn TokenStore>,
        bus: SessionBus,
    ) -> Self {
        let store = CartStore::new(guest_storage);
        let gateway = Arc::new(gateway);
        let coordinator = MergeCoordinator::new(store.clone(), gateway.clone(), tokens.clone());
        let dispatcher = CartDispatcher::new(store.clone(), gateway, coordinator.clone());

        Self {
            store,
            signal: AuthSessionSignal::new(tokens, bus),
            coordinator,
            dispatcher,
            catalog_client: None,
        }
    }

    /// Use `client` to load the catalog during bootstrap.
    #[must_use]
    pub fn with_catalog_client(mut self, client: CatalogClient) -> Self {
        self.catalog_client = Some(client);
        self
    }

    /// Page-load initialization.
    ///
    /// Loads the catalog, then either revalidates an existing session against
    /// the server (no merge) or settles into guest mode.
    pub async fn bootstrap(&self) {
        if let Err(e) = self.load_catalog().await {
            warn!(error = %e, "Catalog unavailable, guest totals deferred");
        }

        if self.signal.is_authenticated() {
            if let Err(e) = self.coordinator.restore_session().await {
                warn!(error = %e, "Could not restore session, continuing as guest");
            }
        } else {
            self.store.dispatch(CartAction::RemoteDiscarded);
            self.store
                .dispatch(CartAction::PhaseChanged(SessionPhase::Guest));
        }

        let view = self.store.view();
        info!(
            phase = %self.store.phase(),
            item_count = view.item_count,
            total = %view.total,
            "Cart engine ready"
        );
    }

    /// Fetch the catalog through the configured client, if any.
    ///
    /// # Errors
    ///
    /// Returns the catalog request error.
    pub async fn load_catalog(&self) -> Result<(), CartError> {
        let Some(client) = &self.catalog_client else {
            debug!("No catalog client configured");
            return Ok(());
        };
        let catalog = client.fetch_catalog().await?;
        self.store.dispatch(CartAction::CatalogLoaded(catalog));
        Ok(())
    }

    /// Install a catalog obtained elsewhere.
    pub fn set_catalog(&self, catalog: Catalog) {
        self.store
            .dispatch(CartAction::CatalogLoaded(Arc::new(catalog)));
    }

    /// Stock of `product_id` according to the loaded catalog.
    #[must_use]
    pub fn stock_for(&self, product_id: &ProductId) -> Option<u32> {
        self.store
            .catalog()
            .and_then(|catalog| catalog.stock(product_id))
    }

    /// React to one session event.
    pub async fn handle_event(&self, event: SessionEvent) {
        debug!(?event, "Session event");
        match event {
            SessionEvent::SessionLost => self.coordinator.session_lost(),
            event if event.is_login() => {
                if let Err(e) = self.coordinator.login().await {
                    warn!(error = %e, "Login transition failed");
                }
            }
            _ => self.coordinator.logout(),
        }
    }

    /// Spawn the task that applies session events to this engine.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut rx = engine.signal.subscribe();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => engine.handle_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Session events dropped, resyncing from token store");
                        engine.resync().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Session listener stopped");
        })
    }

    /// Align the session phase with the token store after missed events.
    async fn resync(&self) {
        let has_token = self.signal.is_authenticated();
        let in_session = self.store.phase().is_authenticated();
        match (has_token, in_session) {
            (true, false) => {
                if let Err(e) = self.coordinator.login().await {
                    warn!(error = %e, "Login transition failed");
                }
            }
            (false, true) => self.coordinator.logout(),
            _ => {}
        }
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &CartDispatcher<G> {
        &self.dispatcher
    }

    #[must_use]
    pub const fn signal(&self) -> &AuthSessionSignal {
        &self.signal
    }

    #[must_use]
    pub const fn coordinator(&self) -> &MergeCoordinator<G> {
        &self.coordinator
    }

    #[must_use]
    pub const fn store(&self) -> &CartStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::gateway::fake::{Call, FakeGateway};
    use crate::storage::{MemoryGuestStorage, MemoryTokenStore};
    use cartsync_core::{CatalogProduct, DerivedView, Price, ViewSource};
    use rust_decimal::Decimal;
    use secrecy::SecretString;

    fn pid(s: &str) -> ProductId {
        ProductId::new(s)
    }

    fn catalog() -> Catalog {
        [CatalogProduct {
            id: pid("p1"),
            name: "Tee".to_string(),
            price: Price::new(Decimal::from(25)),
            stock: 4,
        }]
        .into_iter()
        .collect()
    }

    fn engine(gateway: FakeGateway, tokens: MemoryTokenStore) -> Arc<CartEngine<FakeGateway>> {
        let engine = CartEngine::new(
            gateway,
            Arc::new(MemoryGuestStorage::default()),
            Arc::new(tokens),
            SessionBus::new(),
        );
        engine.set_catalog(catalog());
        Arc::new(engine)
    }

    async fn wait_for_view(engine: &CartEngine<FakeGateway>, f: impl FnMut(&DerivedView) -> bool) {
        let mut rx = engine.dispatcher().subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(f))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_bootstrap_without_token_is_guest() {
        let engine = engine(FakeGateway::new(), MemoryTokenStore::default());
        engine.bootstrap().await;
        assert_eq!(engine.store().phase(), SessionPhase::Guest);
        assert_eq!(engine.stock_for(&pid("p1")), Some(4));
    }

    #[tokio::test]
    async fn test_bootstrap_with_token_restores_without_merge() {
        let gateway = FakeGateway::new().with_product("p1", 25, 4).with_line("p1", 1);
        let engine = engine(gateway.clone(), MemoryTokenStore::with_token("tok"));
        engine.store().dispatch(CartAction::GuestAdd(pid("p1")));

        engine.bootstrap().await;

        assert_eq!(engine.store().phase(), SessionPhase::Authenticated);
        assert_eq!(gateway.calls(), vec![Call::Fetch]);
        assert_eq!(engine.dispatcher().view().source, ViewSource::Remote);
    }

    #[tokio::test]
    async fn test_login_event_merges_through_listener() {
        let gateway = FakeGateway::new().with_product("p1", 25, 4);
        let engine = engine(gateway.clone(), MemoryTokenStore::default());
        engine.bootstrap().await;
        engine.dispatcher().add(&pid("p1"), 4).await;
        let listener = engine.spawn_listener();

        engine
            .signal()
            .login(SecretString::from("tok".to_owned()))
            .unwrap();
        wait_for_view(&engine, |v| {
            v.source == ViewSource::Remote && v.quantity(&pid("p1")) == 1
        })
        .await;

        assert_eq!(gateway.calls(), vec![Call::Fetch, Call::Add(pid("p1"), 1)]);
        listener.abort();
    }

    #[tokio::test]
    async fn test_cross_tab_token_removal_logs_out() {
        let gateway = FakeGateway::new().with_product("p1", 25, 4).with_line("p1", 2);
        let engine = engine(gateway, MemoryTokenStore::with_token("tok"));
        engine.bootstrap().await;
        let listener = engine.spawn_listener();

        engine.signal().relay_token_change(None);
        wait_for_view(&engine, |v| v.source == ViewSource::Guest).await;

        assert_eq!(engine.store().phase(), SessionPhase::Guest);
        assert!(engine.store().snapshot().remote.is_none());
        listener.abort();
    }

    #[tokio::test]
    async fn test_session_lost_event_never_merges() {
        let gateway = FakeGateway::new().with_product("p1", 25, 4);
        let engine = engine(gateway.clone(), MemoryTokenStore::with_token("tok"));
        engine.bootstrap().await;

        engine.handle_event(SessionEvent::SessionLost).await;

        assert_eq!(engine.store().phase(), SessionPhase::Guest);
        assert!(!engine.signal().is_authenticated());
        assert_eq!(gateway.calls(), vec![Call::Fetch]);
    }
}
