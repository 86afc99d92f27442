//! Cart error types, user-visible notices, and Sentry helpers.
//!
//! Every remote cart call returns `Result<_, CartError>`. The dispatcher never
//! lets a `CartError` reach the UI directly: it converts it into a [`Notice`]
//! and leaves the derived view at its last known good value. Unexpected
//! failures (server errors, undecodable bodies) are also captured to Sentry.

use serde::Serialize;
use thiserror::Error;

/// Errors returned by the remote cart gateway and the catalog client.
#[derive(Debug, Error)]
pub enum CartError {
    /// The request did not complete (connect, timeout, TLS, body read).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The session is invalid or expired.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The server rejected the operation (e.g. over stock, bad quantity).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The cart line or product does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The server failed with an unexpected status.
    #[error("Server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Message from the error payload or a truncated body.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl CartError {
    /// Whether this error means the session is gone and the engine must log out.
    #[must_use]
    pub const fn is_session_loss(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Whether a decrease/remove hitting this error has nothing left to do.
    #[must_use]
    pub const fn is_already_satisfied(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether this error is unexpected enough to report to Sentry.
    #[must_use]
    pub const fn is_reportable(&self) -> bool {
        matches!(self, Self::Server { .. } | Self::Decode(_))
    }

    /// The transient notice shown to the user for this error.
    #[must_use]
    pub fn notice(&self) -> Notice {
        let message = match self {
            Self::Network(_) => "Could not reach the cart service, please try again".to_string(),
            Self::Unauthorized(_) => "Your session has expired, please sign in again".to_string(),
            Self::Validation(msg) => msg.clone(),
            Self::NotFound(_) => "This item is no longer in your cart".to_string(),
            Self::Server { .. } | Self::Decode(_) => "Cart service error".to_string(),
        };
        Notice::error(message)
    }
}

// =============================================================================
// Notices
// =============================================================================

/// Severity of a user-visible notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A transient, user-visible message (a toast in a browser UI).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    /// Severity.
    pub level: NoticeLevel,
    /// Human-readable message.
    pub message: String,
}

impl Notice {
    /// Informational notice.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    /// Warning notice.
    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    /// Error notice.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

// =============================================================================
// Sentry
// =============================================================================

/// Capture an unexpected cart error to Sentry and log it.
///
/// Expected failures (validation, not found, auth, network) are only logged.
pub fn report(err: &CartError) {
    if err.is_reportable() {
        let event_id = sentry::capture_error(err);
        tracing::error!(
            error = %err,
            sentry_event_id = %event_id,
            "Cart request error"
        );
    } else {
        tracing::warn!(error = %err, "Cart request failed");
    }
}

/// Add a breadcrumb for user actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of cart
/// operations leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("cart", "add", Some(&[("product_id", "65f0c2")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
