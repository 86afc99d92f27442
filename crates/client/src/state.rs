//! Single-owner cart state container.
//!
//! All cart and session state lives behind one [`CartStore`]. Components
//! change it only by dispatching a [`CartAction`] and read it only through
//! cloned snapshots. After every action the projector re-runs, and the derived
//! view is published on a `watch` channel when it changed.
//!
//! The store also owns the pending-operation lock that serializes
//! authenticated mutations within one engine.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use cartsync_core::{CartLine, Catalog, DerivedView, GuestCart, ProductId, RemoteCartSnapshot};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tracing::debug;

use crate::error::Notice;
use crate::guest::GuestCartStore;
use crate::projector::{project, select_source};
use crate::storage::GuestStorage;

// =============================================================================
// Session Phase
// =============================================================================

/// Where the engine is in the login/logout state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No session; the guest cart is active.
    #[default]
    Guest,
    /// Login observed, remote cart being fetched and merged.
    Transitioning,
    /// Session established; the remote cart is active.
    Authenticated,
    /// Logout observed, remote state being discarded.
    LoggedOut,
}

impl SessionPhase {
    /// Whether cart operations go to the remote cart in this phase.
    #[must_use]
    pub const fn is_authenticated(self) -> bool {
        matches!(self, Self::Transitioning | Self::Authenticated)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Guest => "guest",
            Self::Transitioning => "transitioning",
            Self::Authenticated => "authenticated",
            Self::LoggedOut => "logged_out",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Actions
// =============================================================================

/// Every state change the store accepts.
#[derive(Debug, Clone)]
pub enum CartAction {
    GuestAdd(ProductId),
    GuestRemove(ProductId),
    GuestDelete(ProductId),
    GuestSet(ProductId, u32),
    GuestClear,
    /// A server response arrived. Ignored outside an authenticated phase.
    RemoteReplaced(RemoteCartSnapshot),
    RemoteDiscarded,
    PhaseChanged(SessionPhase),
    CatalogLoaded(Arc<Catalog>),
    /// `quantity` guest units of a product now exist in the remote cart.
    MergeRecorded(ProductId, u32),
    /// Pick up merges recorded through another handle on the guest storage.
    JournalReloaded,
    /// A new session owes the whole guest cart again.
    JournalReset,
    Notice(Notice),
    NoticeCleared,
}

// =============================================================================
// Snapshot
// =============================================================================

/// A point-in-time copy of the store, safe to hold across awaits.
#[derive(Debug, Clone)]
pub struct CartSnapshot {
    pub phase: SessionPhase,
    pub guest: GuestCart,
    pub remote: Option<RemoteCartSnapshot>,
    pub catalog: Option<Arc<Catalog>>,
    pub view: DerivedView,
    pub loading: bool,
    pub notice: Option<Notice>,
}

// =============================================================================
// CartStore
// =============================================================================

/// Shared handle to the cart state. Cheap to clone.
#[derive(Clone)]
pub struct CartStore {
    inner: Arc<CartStoreInner>,
}

struct CartStoreInner {
    state: RwLock<CartState>,
    view_tx: watch::Sender<DerivedView>,
    op_lock: Arc<Mutex<()>>,
}

struct CartState {
    phase: SessionPhase,
    guest: GuestCartStore,
    remote: Option<RemoteCartSnapshot>,
    catalog: Option<Arc<Catalog>>,
    view: DerivedView,
    loading: bool,
    notice: Option<Notice>,
}

impl std::fmt::Debug for CartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("CartStore")
            .field("phase", &state.phase)
            .field("view", &state.view)
            .field("loading", &state.loading)
            .finish_non_exhaustive()
    }
}

impl CartStore {
    /// Create a store in the guest phase, restoring the guest cart from `storage`.
    pub fn new(storage: Arc<dyn GuestStorage>) -> Self {
        let mut state = CartState {
            phase: SessionPhase::Guest,
            guest: GuestCartStore::open(storage),
            remote: None,
            catalog: None,
            view: DerivedView::default(),
            loading: false,
            notice: None,
        };
        state.reproject();
        let (view_tx, _) = watch::channel(state.view.clone());

        Self {
            inner: Arc::new(CartStoreInner {
                state: RwLock::new(state),
                view_tx,
                op_lock: Arc::new(Mutex::new(())),
            }),
        }
    }

    /// Apply an action, re-project, and publish the view if it changed.
    pub fn dispatch(&self, action: CartAction) {
        let view = {
            let mut state = self.write();
            state.reduce(action);
            state.reproject();
            state.view.clone()
        };
        self.inner.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    /// Copy the whole state.
    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        let state = self.read();
        CartSnapshot {
            phase: state.phase,
            guest: state.guest.cart().clone(),
            remote: state.remote.clone(),
            catalog: state.catalog.clone(),
            view: state.view.clone(),
            loading: state.loading,
            notice: state.notice.clone(),
        }
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.read().phase
    }

    /// The last published view.
    #[must_use]
    pub fn view(&self) -> DerivedView {
        self.read().view.clone()
    }

    #[must_use]
    pub fn catalog(&self) -> Option<Arc<Catalog>> {
        self.read().catalog.clone()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.read().loading
    }

    #[must_use]
    pub fn notice(&self) -> Option<Notice> {
        self.read().notice.clone()
    }

    /// Quantity of `product_id` in the replica that is currently active.
    #[must_use]
    pub fn active_quantity(&self, product_id: &ProductId) -> u32 {
        let state = self.read();
        if state.phase.is_authenticated() {
            state
                .remote
                .as_ref()
                .map_or(0, |remote| remote.quantity(product_id))
        } else {
            state.guest.cart().quantity(product_id)
        }
    }

    /// Guest lines not yet replayed into the remote cart.
    #[must_use]
    pub fn pending_merge(&self) -> Vec<CartLine> {
        let state = self.read();
        state.guest.journal().pending(state.guest.cart())
    }

    /// Subscribe to derived view changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DerivedView> {
        self.inner.view_tx.subscribe()
    }

    /// Claim the pending-operation flag if it is free.
    #[must_use]
    pub fn try_begin_operation(&self) -> Option<OperationGuard> {
        let guard = self.inner.op_lock.clone().try_lock_owned().ok()?;
        Some(self.operation_started(guard))
    }

    /// Wait for the pending-operation flag.
    pub async fn begin_operation(&self) -> OperationGuard {
        let guard = self.inner.op_lock.clone().lock_owned().await;
        self.operation_started(guard)
    }

    fn operation_started(&self, guard: OwnedMutexGuard<()>) -> OperationGuard {
        self.write().loading = true;
        OperationGuard {
            _guard: guard,
            store: self.clone(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CartState> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CartState> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl CartState {
    fn reduce(&mut self, action: CartAction) {
        match action {
            CartAction::GuestAdd(id) => {
                self.guest.add(&id);
            }
            CartAction::GuestRemove(id) => {
                self.guest.remove(&id);
            }
            CartAction::GuestDelete(id) => {
                self.guest.delete(&id);
            }
            CartAction::GuestSet(id, quantity) => self.guest.set(&id, quantity),
            CartAction::GuestClear => self.guest.clear(),
            CartAction::RemoteReplaced(snapshot) => {
                if self.phase.is_authenticated() {
                    self.remote = Some(snapshot);
                } else {
                    debug!(phase = %self.phase, "Ignoring remote snapshot outside a session");
                }
            }
            CartAction::RemoteDiscarded => self.remote = None,
            CartAction::PhaseChanged(phase) => {
                debug!(from = %self.phase, to = %phase, "Session phase changed");
                self.phase = phase;
            }
            CartAction::CatalogLoaded(catalog) => self.catalog = Some(catalog),
            CartAction::MergeRecorded(id, quantity) => self.guest.record_merged(&id, quantity),
            CartAction::JournalReloaded => self.guest.reload_journal(),
            CartAction::JournalReset => self.guest.reset_journal(),
            CartAction::Notice(notice) => self.notice = Some(notice),
            CartAction::NoticeCleared => self.notice = None,
        }
    }

    /// Recompute the view; keep the previous one while the projector defers.
    fn reproject(&mut self) {
        let source = select_source(
            self.phase.is_authenticated(),
            self.guest.cart(),
            self.remote.as_ref(),
            self.catalog.as_deref(),
        );
        if let Some(view) = source.and_then(project) {
            self.view = view;
        }
    }
}

// =============================================================================
// OperationGuard
// =============================================================================

/// Holds the pending-operation flag. Dropping it clears the flag.
pub struct OperationGuard {
    _guard: OwnedMutexGuard<()>,
    store: CartStore,
}

impl std::fmt::Debug for OperationGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationGuard").finish_non_exhaustive()
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.store.write().loading = false;
    }
}
