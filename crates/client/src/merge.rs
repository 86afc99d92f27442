//! Merge coordinator: the login/logout state machine.
//!
//! ```text
//! Guest ──login──▶ Transitioning ──fetch + replay──▶ Authenticated
//! Authenticated ──logout / session lost──▶ LoggedOut ──▶ Guest
//! ```
//!
//! On login the guest lines captured before the transition are replayed into
//! the remote cart one `add` at a time, in order. A failed line is logged and
//! skipped. Each successful line is recorded in the merge journal so a later
//! login only replays what the remote cart has not seen yet.
//!
//! The guest cart is never cleared here. It is the fallback cart after logout.
//! An explicit logout resets the journal, so the next session, possibly a
//! different account, receives the whole guest cart. A lost session keeps it,
//! so signing back in resumes an interrupted merge.

use std::sync::Arc;

use cartsync_core::{CartLine, ProductId};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{CartError, Notice, report};
use crate::gateway::RemoteCartGateway;
use crate::state::{CartAction, CartStore, SessionPhase};
use crate::storage::TokenStore;

/// Outcome of one login merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Correlates the log lines of one merge run.
    pub merge_id: Uuid,
    /// Lines added to the remote cart.
    pub replayed: Vec<CartLine>,
    /// Products whose add failed.
    pub skipped: Vec<ProductId>,
}

impl MergeReport {
    fn new() -> Self {
        Self {
            merge_id: Uuid::new_v4(),
            replayed: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

/// Drives session transitions against the store and the remote cart.
pub struct MergeCoordinator<G> {
    store: CartStore,
    gateway: Arc<G>,
    tokens: Arc<dyn TokenStore>,
}

impl<G> Clone for MergeCoordinator<G> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            gateway: self.gateway.clone(),
            tokens: self.tokens.clone(),
        }
    }
}

impl<G> std::fmt::Debug for MergeCoordinator<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeCoordinator")
            .field("phase", &self.store.phase())
            .finish_non_exhaustive()
    }
}

impl<G: RemoteCartGateway> MergeCoordinator<G> {
    pub fn new(store: CartStore, gateway: Arc<G>, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            store,
            gateway,
            tokens,
        }
    }

    /// Login transition: fetch the remote cart, then replay the guest cart into it.
    ///
    /// Returns `Ok(None)` when a session is already active, so a duplicated
    /// login event never merges twice.
    ///
    /// # Errors
    ///
    /// Returns the fetch error if the remote cart could not be loaded, or the
    /// error that ended the session mid-merge. Individual line failures are
    /// not errors; they are listed in the report.
    #[instrument(skip(self))]
    pub async fn login(&self) -> Result<Option<MergeReport>, CartError> {
        if self.store.phase().is_authenticated() {
            debug!("Login observed with a session already active, skipping merge");
            return Ok(None);
        }

        self.store
            .dispatch(CartAction::PhaseChanged(SessionPhase::Transitioning));
        let op = self.store.begin_operation().await;

        // Another tab may already have merged into this session.
        // Guest mutations are routed remotely from here on, so the cart is settled.
        self.store.dispatch(CartAction::JournalReloaded);
        let guest = self.store.snapshot().guest;
        let pending = self.store.pending_merge();
        let mut report = MergeReport::new();

        match self.gateway.fetch().await {
            Ok(snapshot) => self.store.dispatch(CartAction::RemoteReplaced(snapshot)),
            Err(e) => {
                drop(op);
                return Err(self.fetch_failed(e));
            }
        }

        for line in pending {
            match self.gateway.add(&line.product_id, line.quantity).await {
                Ok(snapshot) => {
                    self.store.dispatch(CartAction::RemoteReplaced(snapshot));
                    self.store.dispatch(CartAction::MergeRecorded(
                        line.product_id.clone(),
                        guest.quantity(&line.product_id),
                    ));
                    report.replayed.push(line);
                }
                Err(e) if e.is_session_loss() => {
                    drop(op);
                    warn!(
                        merge_id = %report.merge_id,
                        replayed = report.replayed.len(),
                        "Session lost during merge"
                    );
                    self.session_lost();
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        merge_id = %report.merge_id,
                        product_id = %line.product_id,
                        quantity = line.quantity,
                        error = %e,
                        "Skipping guest line that failed to merge"
                    );
                    report.skipped.push(line.product_id);
                }
            }
        }

        self.store
            .dispatch(CartAction::PhaseChanged(SessionPhase::Authenticated));
        drop(op);

        info!(
            merge_id = %report.merge_id,
            replayed = report.replayed.len(),
            skipped = report.skipped.len(),
            item_count = self.store.view().item_count,
            "Guest cart merged"
        );
        Ok(Some(report))
    }

    /// Page-load transition for an existing token: fetch only, no merge.
    ///
    /// # Errors
    ///
    /// Returns the fetch error. The engine is back in guest mode afterwards.
    #[instrument(skip(self))]
    pub async fn restore_session(&self) -> Result<(), CartError> {
        self.store
            .dispatch(CartAction::PhaseChanged(SessionPhase::Transitioning));
        let op = self.store.begin_operation().await;

        match self.gateway.fetch().await {
            Ok(snapshot) => {
                self.store.dispatch(CartAction::RemoteReplaced(snapshot));
                self.store
                    .dispatch(CartAction::PhaseChanged(SessionPhase::Authenticated));
                info!(
                    item_count = self.store.view().item_count,
                    "Session restored"
                );
                Ok(())
            }
            Err(e) => {
                drop(op);
                if e.is_session_loss() {
                    self.session_lost();
                } else {
                    report(&e);
                    self.store.dispatch(CartAction::Notice(e.notice()));
                    self.leave_session();
                }
                Err(e)
            }
        }
    }

    /// Logout transition. The guest cart is left untouched; the merge journal
    /// is reset for whichever session comes next.
    pub fn logout(&self) {
        let snapshot = self.store.snapshot();
        if snapshot.phase == SessionPhase::Guest && snapshot.remote.is_none() {
            debug!("Logout observed while already a guest");
            return;
        }
        self.leave_session();
        self.store.dispatch(CartAction::JournalReset);
        info!(
            item_count = self.store.view().item_count,
            "Logged out, guest cart active"
        );
    }

    /// Forced logout after the server rejected the session. Never merges.
    pub fn session_lost(&self) {
        if let Err(e) = self.tokens.clear_token() {
            warn!(error = %e, "Failed to clear rejected token");
        }
        self.store.dispatch(CartAction::Notice(Notice::warning(
            "Your session has expired, please sign in again",
        )));
        self.leave_session();
        warn!("Session lost, guest cart active");
    }

    fn leave_session(&self) {
        self.store
            .dispatch(CartAction::PhaseChanged(SessionPhase::LoggedOut));
        self.store.dispatch(CartAction::RemoteDiscarded);
        self.store
            .dispatch(CartAction::PhaseChanged(SessionPhase::Guest));
    }

    /// The login fetch failed: log out on session loss, otherwise stay signed
    /// in with nothing to show until a refresh succeeds.
    fn fetch_failed(&self, e: CartError) -> CartError {
        if e.is_session_loss() {
            self.session_lost();
        } else {
            report(&e);
            self.store.dispatch(CartAction::Notice(e.notice()));
            self.store
                .dispatch(CartAction::PhaseChanged(SessionPhase::Authenticated));
        }
        e
    }
}
