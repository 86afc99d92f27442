//! Session commands.
//!
//! `cartctl` is one short-lived process, so instead of a background listener
//! each command publishes through the auth signal and applies the event it
//! receives back from the bus.

use cartsync_client::dispatcher::Outcome;
use cartsync_client::error::Notice;
use secrecy::SecretString;
use tokio::sync::broadcast;

use super::{CliError, Engine};

/// Store `token` and run the login transition, merging the guest cart.
pub async fn login(engine: &Engine, token: String) -> Result<Outcome, CliError> {
    let mut events = engine.signal().subscribe();
    engine.signal().login(SecretString::from(token))?;
    apply_next(engine, &mut events).await;

    if engine.store().phase().is_authenticated() {
        Ok(Outcome::Applied)
    } else {
        Ok(Outcome::Rejected(
            engine
                .store()
                .notice()
                .unwrap_or_else(|| Notice::error("Sign-in failed")),
        ))
    }
}

/// Forget the token and fall back to the guest cart.
pub async fn logout(engine: &Engine) -> Result<Outcome, CliError> {
    let mut events = engine.signal().subscribe();
    engine.signal().logout()?;
    apply_next(engine, &mut events).await;
    Ok(Outcome::Applied)
}

async fn apply_next(
    engine: &Engine,
    events: &mut broadcast::Receiver<cartsync_client::session::SessionEvent>,
) {
    match events.recv().await {
        Ok(event) => engine.handle_event(event).await,
        Err(e) => tracing::warn!(error = %e, "Session event not received"),
    }
}
