//! Guest cart store: the unauthenticated replica and its persisted mirror.
//!
//! All operations are synchronous and infallible from the caller's point of
//! view. A failed write to storage is logged and the in-memory cart stays
//! authoritative until the next successful write.
//!
//! The store also owns the [`MergeJournal`], which remembers how much of each
//! guest line has already been replayed into the remote cart. The journal is
//! persisted in the same document as the cart so an interrupted merge resumes
//! instead of adding the same units twice. Several handles may share one
//! storage (one per tab), so the journal is re-read from storage before every
//! write and before a merge reads it. It never exceeds the guest quantity.

use std::collections::BTreeMap;
use std::sync::Arc;

use cartsync_core::{CartLine, GuestCart, ProductId};
use chrono::Utc;
use tracing::{debug, warn};

use crate::storage::{GUEST_DOCUMENT_VERSION, GuestDocument, GuestStorage};

// =============================================================================
// MergeJournal
// =============================================================================

/// Per-product guest quantity already replayed into the remote cart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeJournal {
    merged: BTreeMap<ProductId, u32>,
}

impl MergeJournal {
    /// Quantity of `product_id` already replayed.
    #[must_use]
    pub fn merged(&self, product_id: &ProductId) -> u32 {
        self.merged.get(product_id).copied().unwrap_or(0)
    }

    /// Lines still owed to the remote cart: guest quantity minus what was replayed.
    #[must_use]
    pub fn pending(&self, cart: &GuestCart) -> Vec<CartLine> {
        cart.lines()
            .filter_map(|line| {
                let owed = line.quantity.saturating_sub(self.merged(&line.product_id));
                (owed > 0).then(|| CartLine {
                    product_id: line.product_id,
                    quantity: owed,
                })
            })
            .collect()
    }

    fn record(&mut self, product_id: &ProductId, quantity: u32) {
        if quantity == 0 {
            self.merged.remove(product_id);
        } else {
            self.merged.insert(product_id.clone(), quantity);
        }
    }

    /// Drop entries for products no longer in `cart` and cap the rest at the
    /// guest quantity.
    fn clamp_to(&mut self, cart: &GuestCart) {
        self.merged.retain(|product_id, merged| {
            *merged = (*merged).min(cart.quantity(product_id));
            *merged > 0
        });
    }
}

// =============================================================================
// GuestCartStore
// =============================================================================

/// The guest cart plus its persisted mirror.
pub struct GuestCartStore {
    cart: GuestCart,
    journal: MergeJournal,
    storage: Arc<dyn GuestStorage>,
}

impl std::fmt::Debug for GuestCartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestCartStore")
            .field("cart", &self.cart)
            .field("journal", &self.journal)
            .finish_non_exhaustive()
    }
}

impl GuestCartStore {
    /// Restore the guest cart from `storage`, starting empty if nothing usable is stored.
    pub fn open(storage: Arc<dyn GuestStorage>) -> Self {
        let document = match storage.load() {
            Ok(Some(document)) => document,
            Ok(None) => GuestDocument::default(),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable guest cart, starting empty");
                GuestDocument::default()
            }
        };
        debug!(
            lines = document.items.len(),
            items = document.items.item_count(),
            "Guest cart restored"
        );
        Self {
            cart: document.items,
            journal: MergeJournal {
                merged: document.merged,
            },
            storage,
        }
    }

    /// The current guest cart.
    #[must_use]
    pub const fn cart(&self) -> &GuestCart {
        &self.cart
    }

    /// The merge journal.
    #[must_use]
    pub const fn journal(&self) -> &MergeJournal {
        &self.journal
    }

    /// Increment `product_id` by one. Returns the new quantity.
    pub fn add(&mut self, product_id: &ProductId) -> u32 {
        let quantity = self.cart.add(product_id);
        self.commit();
        quantity
    }

    /// Decrement `product_id` by one, deleting it at zero. Absent products are a no-op.
    pub fn remove(&mut self, product_id: &ProductId) -> u32 {
        if self.cart.quantity(product_id) == 0 {
            return 0;
        }
        let remaining = self.cart.remove(product_id);
        self.commit();
        remaining
    }

    /// Remove `product_id` regardless of quantity.
    pub fn delete(&mut self, product_id: &ProductId) -> Option<u32> {
        let removed = self.cart.delete(product_id);
        if removed.is_some() {
            self.commit();
        }
        removed
    }

    /// Set an absolute quantity; zero deletes.
    pub fn set(&mut self, product_id: &ProductId, quantity: u32) {
        self.cart.set(product_id, quantity);
        self.commit();
    }

    /// Empty the cart and the journal.
    pub fn clear(&mut self) {
        self.cart.clear();
        self.journal = MergeJournal::default();
        self.persist();
    }

    /// Record that the guest quantity of `product_id` has been replayed.
    pub fn record_merged(&mut self, product_id: &ProductId, quantity: u32) {
        self.reload_journal();
        self.journal.record(product_id, quantity);
        self.journal.clamp_to(&self.cart);
        self.persist();
    }

    /// Forget every replayed quantity, so the next merge replays the whole cart.
    pub fn reset_journal(&mut self) {
        self.reload_journal();
        if self.journal.merged.is_empty() {
            return;
        }
        self.journal = MergeJournal::default();
        self.persist();
    }

    /// Replace the in-memory journal with the stored one.
    ///
    /// Another handle on the same storage may have merged or reset since this
    /// one last looked. An unreadable document keeps the in-memory journal.
    pub fn reload_journal(&mut self) {
        match self.storage.load() {
            Ok(Some(document)) => {
                self.journal = MergeJournal {
                    merged: document.merged,
                };
            }
            Ok(None) => self.journal = MergeJournal::default(),
            Err(e) => warn!(error = %e, "Could not re-read merge journal, keeping cached copy"),
        }
        self.journal.clamp_to(&self.cart);
    }

    /// Persist a cart change without clobbering a journal written elsewhere.
    fn commit(&mut self) {
        self.reload_journal();
        self.persist();
    }

    fn persist(&self) {
        let document = GuestDocument {
            version: GUEST_DOCUMENT_VERSION,
            items: self.cart.clone(),
            merged: self.journal.merged.clone(),
            updated_at: Some(Utc::now()),
        };
        if let Err(e) = self.storage.save(&document) {
            warn!(error = %e, "Failed to persist guest cart");
        }
    }
}
