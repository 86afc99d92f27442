//! Auth session signal and the session event bus.
//!
//! The engine does not issue or refresh tokens. It observes three topics:
//!
//! - [`SessionEvent::AuthChanged`]: login or logout in this process
//! - [`SessionEvent::TokenChanged`]: another tab or process rewrote the shared token
//! - [`SessionEvent::SessionLost`]: the server rejected the current token
//!
//! Events travel over a `tokio::sync::broadcast` channel. Every subscriber
//! sees every event, and each engine reacts to them independently.

use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::storage::{StorageError, TokenStore};

/// Events buffered per subscriber before it starts lagging.
const SESSION_BUS_CAPACITY: usize = 64;

/// A session change notification.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Same-process login (`true`) or logout (`false`).
    AuthChanged { is_authenticated: bool },
    /// The shared token was written (`Some`) or removed (`None`) elsewhere.
    TokenChanged { token: Option<SecretString> },
    /// The session is invalid; log out without merging.
    SessionLost,
}

impl SessionEvent {
    /// Whether the event leaves a session in place.
    #[must_use]
    pub const fn is_login(&self) -> bool {
        match self {
            Self::AuthChanged { is_authenticated } => *is_authenticated,
            Self::TokenChanged { token } => token.is_some(),
            Self::SessionLost => false,
        }
    }
}

// =============================================================================
// SessionBus
// =============================================================================

/// Publish/subscribe channel for [`SessionEvent`]s.
#[derive(Debug, Clone)]
pub struct SessionBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SESSION_BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Returns the number of subscribers that will see it.
    pub fn publish(&self, event: SessionEvent) -> usize {
        // No subscribers is not an error: nobody is listening yet
        self.tx.send(event).unwrap_or(0)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

// =============================================================================
// AuthSessionSignal
// =============================================================================

/// `isAuthenticated` plus change notification, backed by the token store.
#[derive(Clone)]
pub struct AuthSessionSignal {
    tokens: Arc<dyn TokenStore>,
    bus: SessionBus,
}

impl std::fmt::Debug for AuthSessionSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSessionSignal")
            .field("is_authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl AuthSessionSignal {
    pub fn new(tokens: Arc<dyn TokenStore>, bus: SessionBus) -> Self {
        Self { tokens, bus }
    }

    /// Whether a token is currently held.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.tokens.token().is_some()
    }

    /// Store a freshly issued token and announce the login.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the token cannot be stored; nothing is published.
    pub fn login(&self, token: SecretString) -> Result<(), StorageError> {
        self.tokens.set_token(token)?;
        info!("Signed in");
        self.bus.publish(SessionEvent::AuthChanged {
            is_authenticated: true,
        });
        Ok(())
    }

    /// Forget the token and announce the logout.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the stored token cannot be removed; nothing is published.
    pub fn logout(&self) -> Result<(), StorageError> {
        self.tokens.clear_token()?;
        info!("Signed out");
        self.bus.publish(SessionEvent::AuthChanged {
            is_authenticated: false,
        });
        Ok(())
    }

    /// Relay a token change observed in shared storage.
    ///
    /// The other writer already updated the store, so only the event is published.
    pub fn relay_token_change(&self, token: Option<SecretString>) {
        debug!(present = token.is_some(), "Relaying token change");
        self.bus.publish(SessionEvent::TokenChanged { token });
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    #[must_use]
    pub const fn bus(&self) -> &SessionBus {
        &self.bus
    }
}
