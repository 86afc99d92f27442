//! Cart operation dispatcher: the single UI-facing cart surface.
//!
//! Every operation is routed by the current session phase:
//!
//! - Guest: the guest cart is mutated synchronously through the store
//! - Authenticated: one gateway call under the pending-operation flag, and the
//!   returned snapshot replaces the remote cart
//!
//! Failures never reach the caller as errors. They become a [`Notice`], and
//! the derived view stays at its last good value.

use std::sync::Arc;

use cartsync_core::{DerivedView, ProductId, RemoteCartSnapshot};
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use crate::error::{CartError, Notice, add_breadcrumb, report};
use crate::gateway::RemoteCartGateway;
use crate::merge::MergeCoordinator;
use crate::state::{CartAction, CartSnapshot, CartStore};

/// Result of a dispatched operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The active cart now reflects the operation.
    Applied,
    /// Nothing changed; the notice says why.
    Rejected(Notice),
}

impl Outcome {
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// A remote mutation, kept as data so the pending-flag handling lives in one place.
#[derive(Debug, Clone, Copy)]
enum RemoteOp<'a> {
    Add(&'a ProductId),
    SetQuantity(&'a ProductId, u32),
    Decrease(&'a ProductId),
    RemoveLine(&'a ProductId),
    Clear,
    Refresh,
}

impl RemoteOp<'_> {
    /// Whether a missing line means the operation already holds.
    const fn tolerates_missing(self) -> bool {
        matches!(self, Self::Decrease(_) | Self::RemoveLine(_))
    }
}

/// Routes cart operations to the guest cart or the remote cart.
pub struct CartDispatcher<G> {
    store: CartStore,
    gateway: Arc<G>,
    coordinator: MergeCoordinator<G>,
}

impl<G> Clone for CartDispatcher<G> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            gateway: self.gateway.clone(),
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<G> std::fmt::Debug for CartDispatcher<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartDispatcher")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl<G: RemoteCartGateway> CartDispatcher<G> {
    pub const fn new(
        store: CartStore,
        gateway: Arc<G>,
        coordinator: MergeCoordinator<G>,
    ) -> Self {
        Self {
            store,
            gateway,
            coordinator,
        }
    }

    /// Add one unit, unless the active quantity already reached `stock`.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn add(&self, product_id: &ProductId, stock: u32) -> Outcome {
        let current = self.store.active_quantity(product_id);
        if current >= stock {
            debug!(current, stock, "Add rejected at stock ceiling");
            return self.reject(Notice::warning(format!(
                "Stock limit reached: only {stock} available"
            )));
        }

        add_breadcrumb("cart", "add", Some(&[("product_id", product_id.as_str())]));
        if self.store.phase().is_authenticated() {
            self.run_remote(RemoteOp::Add(product_id)).await
        } else {
            self.store.dispatch(CartAction::GuestAdd(product_id.clone()));
            Outcome::Applied
        }
    }

    /// Remove one unit; the line disappears at zero.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn decrease(&self, product_id: &ProductId) -> Outcome {
        add_breadcrumb(
            "cart",
            "decrease",
            Some(&[("product_id", product_id.as_str())]),
        );
        if self.store.phase().is_authenticated() {
            self.run_remote(RemoteOp::Decrease(product_id)).await
        } else {
            self.store
                .dispatch(CartAction::GuestRemove(product_id.clone()));
            Outcome::Applied
        }
    }

    /// Remove the whole line.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn delete(&self, product_id: &ProductId) -> Outcome {
        add_breadcrumb("cart", "delete", Some(&[("product_id", product_id.as_str())]));
        if self.store.phase().is_authenticated() {
            self.run_remote(RemoteOp::RemoveLine(product_id)).await
        } else {
            self.store
                .dispatch(CartAction::GuestDelete(product_id.clone()));
            Outcome::Applied
        }
    }

    /// Set an absolute quantity. Zero removes the line.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn set_quantity(&self, product_id: &ProductId, quantity: u32, stock: u32) -> Outcome {
        if quantity == 0 {
            return self.delete(product_id).await;
        }
        if quantity > stock {
            return self.reject(Notice::warning(format!(
                "Stock limit reached: only {stock} available"
            )));
        }

        let quantity_str = quantity.to_string();
        add_breadcrumb(
            "cart",
            "set_quantity",
            Some(&[
                ("product_id", product_id.as_str()),
                ("quantity", quantity_str.as_str()),
            ]),
        );
        if self.store.phase().is_authenticated() {
            self.run_remote(RemoteOp::SetQuantity(product_id, quantity))
                .await
        } else {
            self.store
                .dispatch(CartAction::GuestSet(product_id.clone(), quantity));
            Outcome::Applied
        }
    }

    /// Empty the active cart.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Outcome {
        add_breadcrumb("cart", "clear", None);
        if self.store.phase().is_authenticated() {
            self.run_remote(RemoteOp::Clear).await
        } else {
            self.store.dispatch(CartAction::GuestClear);
            Outcome::Applied
        }
    }

    /// Re-fetch the remote cart. Guest carts are always current.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Outcome {
        if self.store.phase().is_authenticated() {
            self.run_remote(RemoteOp::Refresh).await
        } else {
            Outcome::Applied
        }
    }

    /// The current derived view.
    #[must_use]
    pub fn view(&self) -> DerivedView {
        self.store.view()
    }

    /// Subscribe to derived view changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DerivedView> {
        self.store.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        self.store.snapshot()
    }

    /// Take the pending notice, clearing it.
    pub fn take_notice(&self) -> Option<Notice> {
        let notice = self.store.notice();
        if notice.is_some() {
            self.store.dispatch(CartAction::NoticeCleared);
        }
        notice
    }

    async fn run_remote(&self, op: RemoteOp<'_>) -> Outcome {
        let Some(guard) = self.store.try_begin_operation() else {
            debug!(?op, "Cart operation already in flight");
            return self.reject(Notice::info(
                "Another cart update is in progress, please wait",
            ));
        };

        match self.call(op).await {
            Ok(snapshot) => {
                self.store.dispatch(CartAction::RemoteReplaced(snapshot));
                Outcome::Applied
            }
            Err(e) if e.is_already_satisfied() && op.tolerates_missing() => {
                debug!(?op, "Line already gone, reconciling");
                match self.gateway.fetch().await {
                    Ok(snapshot) => {
                        self.store.dispatch(CartAction::RemoteReplaced(snapshot));
                        Outcome::Applied
                    }
                    Err(e) if e.is_session_loss() => {
                        drop(guard);
                        self.coordinator.session_lost();
                        Outcome::Rejected(e.notice())
                    }
                    Err(e) => {
                        // The line is gone either way; only the refresh failed
                        report(&e);
                        warn!(?op, error = %e, "Reconciling fetch failed");
                        Outcome::Applied
                    }
                }
            }
            Err(e) if e.is_session_loss() => {
                drop(guard);
                self.coordinator.session_lost();
                Outcome::Rejected(e.notice())
            }
            Err(e) => {
                report(&e);
                self.reject(e.notice())
            }
        }
    }

    async fn call(&self, op: RemoteOp<'_>) -> Result<RemoteCartSnapshot, CartError> {
        match op {
            RemoteOp::Add(id) => self.gateway.add(id, 1).await,
            RemoteOp::SetQuantity(id, quantity) => self.gateway.set_quantity(id, quantity).await,
            RemoteOp::Decrease(id) => self.gateway.decrease(id).await,
            RemoteOp::RemoveLine(id) => self.gateway.remove_line(id).await,
            RemoteOp::Clear => self.gateway.clear().await,
            RemoteOp::Refresh => self.gateway.fetch().await,
        }
    }

    fn reject(&self, notice: Notice) -> Outcome {
        self.store.dispatch(CartAction::Notice(notice.clone()));
        Outcome::Rejected(notice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NoticeLevel;
    use crate::gateway::fake::{Call, Failure, FakeGateway};
    use crate::state::SessionPhase;
    use crate::storage::{MemoryGuestStorage, MemoryTokenStore, TokenStore};
    use cartsync_core::{Catalog, CatalogProduct, Price, ViewSource};
    use rust_decimal::Decimal;

    fn pid(s: &str) -> ProductId {
        ProductId::new(s)
    }

    struct Harness {
        store: CartStore,
        gateway: Arc<FakeGateway>,
        tokens: Arc<MemoryTokenStore>,
        coordinator: MergeCoordinator<FakeGateway>,
        dispatcher: CartDispatcher<FakeGateway>,
    }

    fn harness(gateway: FakeGateway) -> Harness {
        let store = CartStore::new(Arc::new(MemoryGuestStorage::default()));
        let catalog: Catalog = [("p1", 25), ("p2", 10)]
            .into_iter()
            .map(|(id, price)| CatalogProduct {
                id: pid(id),
                name: id.to_string(),
                price: Price::new(Decimal::from(price)),
                stock: 2,
            })
            .collect();
        store.dispatch(CartAction::CatalogLoaded(Arc::new(catalog)));

        let gateway = Arc::new(gateway);
        let tokens = Arc::new(MemoryTokenStore::with_token("tok"));
        let coordinator = MergeCoordinator::new(store.clone(), gateway.clone(), tokens.clone());
        let dispatcher = CartDispatcher::new(store.clone(), gateway.clone(), coordinator.clone());
        Harness {
            store,
            gateway,
            tokens,
            coordinator,
            dispatcher,
        }
    }

    async fn signed_in(gateway: FakeGateway) -> Harness {
        let h = harness(gateway);
        h.coordinator.restore_session().await.unwrap();
        h
    }

    #[tokio::test]
    async fn test_guest_operations_update_view() {
        let h = harness(FakeGateway::new());
        let p1 = pid("p1");

        assert!(h.dispatcher.add(&p1, 5).await.is_applied());
        assert!(h.dispatcher.add(&p1, 5).await.is_applied());
        let view = h.dispatcher.view();
        assert_eq!(view.quantity(&p1), 2);
        assert_eq!(view.item_count, 2);
        assert_eq!(view.total, Decimal::from(50));

        h.dispatcher.decrease(&p1).await;
        assert_eq!(h.dispatcher.view().quantity(&p1), 1);

        h.dispatcher.set_quantity(&p1, 0, 5).await;
        assert!(h.dispatcher.view().is_empty());
        assert!(h.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_guest_add_rejected_at_stock_ceiling() {
        let h = harness(FakeGateway::new());
        let p1 = pid("p1");
        h.dispatcher.add(&p1, 1).await;

        let outcome = h.dispatcher.add(&p1, 1).await;

        assert!(matches!(
            outcome,
            Outcome::Rejected(Notice {
                level: NoticeLevel::Warning,
                ..
            })
        ));
        assert_eq!(h.store.snapshot().guest.quantity(&p1), 1);
        assert!(h.gateway.calls().is_empty());
        assert!(h.dispatcher.take_notice().is_some());
        assert!(h.dispatcher.take_notice().is_none());
    }

    #[tokio::test]
    async fn test_remote_add_rejected_at_stock_ceiling_without_call() {
        let h = signed_in(FakeGateway::new().with_product("p1", 25, 2).with_line("p1", 2)).await;

        let outcome = h.dispatcher.add(&pid("p1"), 2).await;

        assert!(!outcome.is_applied());
        assert_eq!(h.gateway.calls(), vec![Call::Fetch]);
    }

    #[tokio::test]
    async fn test_remote_decrease_at_one_removes_line() {
        let h = signed_in(
            FakeGateway::new()
                .with_product("p1", 25, 5)
                .with_product("p2", 10, 5)
                .with_line("p1", 1)
                .with_line("p2", 1),
        )
        .await;
        assert_eq!(h.dispatcher.view().item_count, 2);

        assert!(h.dispatcher.decrease(&pid("p2")).await.is_applied());

        let view = h.dispatcher.view();
        assert_eq!(view.quantity(&pid("p2")), 0);
        assert!(!view.cart_items.contains_key(&pid("p2")));
        assert_eq!(view.item_count, 1);
        assert_eq!(view.total, Decimal::from(25));
    }

    #[tokio::test]
    async fn test_missing_line_counts_as_satisfied() {
        let h = signed_in(FakeGateway::new()).await;

        assert!(h.dispatcher.delete(&pid("gone")).await.is_applied());
        assert_eq!(
            h.gateway.calls(),
            vec![Call::Fetch, Call::RemoveLine(pid("gone")), Call::Fetch]
        );
    }

    #[tokio::test]
    async fn test_expired_session_during_reconcile_logs_out() {
        let h = signed_in(FakeGateway::new()).await;
        h.gateway.fail_fetch(Failure::Unauthorized);

        let outcome = h.dispatcher.decrease(&pid("gone")).await;

        assert!(!outcome.is_applied());
        assert_eq!(h.store.phase(), SessionPhase::Guest);
        assert!(h.tokens.token().is_none());
    }

    #[tokio::test]
    async fn test_network_failure_keeps_last_view() {
        let gateway = FakeGateway::new().with_product("p1", 25, 5).with_line("p1", 1);
        gateway.fail_product("p1", Failure::Network);
        let h = signed_in(gateway).await;
        let before = h.dispatcher.view();

        let outcome = h.dispatcher.add(&pid("p1"), 5).await;

        assert!(!outcome.is_applied());
        assert_eq!(h.dispatcher.view(), before);
        assert_eq!(h.store.phase(), SessionPhase::Authenticated);
        let notice = h.dispatcher.take_notice().unwrap();
        assert_eq!(notice.level, NoticeLevel::Error);
        assert_eq!(
            notice.message,
            "Could not reach the cart service, please try again"
        );
    }

    #[tokio::test]
    async fn test_server_error_keeps_last_view() {
        let gateway = FakeGateway::new().with_product("p1", 25, 5).with_line("p1", 1);
        gateway.fail_product("p1", Failure::Server);
        let h = signed_in(gateway).await;
        let before = h.dispatcher.view();

        let outcome = h.dispatcher.add(&pid("p1"), 5).await;

        assert!(!outcome.is_applied());
        assert_eq!(h.dispatcher.view(), before);
        assert_eq!(h.store.notice().unwrap().message, "Cart service error");
        assert!(!h.store.is_loading());
    }

    #[tokio::test]
    async fn test_unauthorized_falls_back_to_guest() {
        let gateway = FakeGateway::new().with_product("p1", 25, 5);
        gateway.fail_product("p1", Failure::Unauthorized);
        let h = signed_in(gateway).await;
        assert_eq!(h.store.phase(), SessionPhase::Authenticated);

        h.dispatcher.add(&pid("p1"), 5).await;

        assert_eq!(h.store.phase(), SessionPhase::Guest);
        assert!(h.tokens.token().is_none());
        assert_eq!(h.dispatcher.view().source, ViewSource::Guest);
    }

    #[tokio::test]
    async fn test_second_mutation_rejected_while_busy() {
        let h = signed_in(FakeGateway::new().with_product("p1", 25, 5)).await;
        let release = h.gateway.hold();

        let first = {
            let dispatcher = h.dispatcher.clone();
            tokio::spawn(async move { dispatcher.add(&pid("p1"), 5).await })
        };
        while !h.store.is_loading() {
            tokio::task::yield_now().await;
        }

        let second = h.dispatcher.add(&pid("p1"), 5).await;
        assert!(matches!(second, Outcome::Rejected(_)));

        release.notify_one();
        assert!(first.await.unwrap().is_applied());
        assert_eq!(h.dispatcher.view().quantity(&pid("p1")), 1);
        assert_eq!(
            h.gateway.calls(),
            vec![Call::Fetch, Call::Add(pid("p1"), 1)]
        );
    }

    #[tokio::test]
    async fn test_remote_clear_empties_view() {
        let h = signed_in(FakeGateway::new().with_product("p1", 25, 5).with_line("p1", 2)).await;

        assert!(h.dispatcher.clear().await.is_applied());
        let view = h.dispatcher.view();
        assert!(view.is_empty());
        assert_eq!(view.source, ViewSource::Remote);
    }
}
