//! Client-local persistence: the guest cart document and the access token.
//!
//! Both stores are key-value style collaborators that survive restarts. The
//! guest document is read once at startup and rewritten after every guest
//! mutation; writes go to a temp file first and are renamed into place so a
//! crash never leaves a half-written cart behind.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use cartsync_core::{GuestCart, ProductId};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current guest document format version.
pub const GUEST_DOCUMENT_VERSION: u32 = 1;

/// Errors from client-local persistence.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Stored document could not be parsed or serialized.
    #[error("Malformed document: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Stored document has a version this build does not understand.
    #[error("Unsupported document version {0}")]
    UnsupportedVersion(u32),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// =============================================================================
// Guest Document
// =============================================================================

/// Persisted form of the guest cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestDocument {
    /// Format version.
    pub version: u32,
    /// Guest cart lines.
    #[serde(default)]
    pub items: GuestCart,
    /// Guest quantity already replayed into the remote cart, per product.
    #[serde(default)]
    pub merged: BTreeMap<ProductId, u32>,
    /// Last write time.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for GuestDocument {
    fn default() -> Self {
        Self {
            version: GUEST_DOCUMENT_VERSION,
            items: GuestCart::new(),
            merged: BTreeMap::new(),
            updated_at: None,
        }
    }
}

/// Key-value persistence for the guest cart document.
pub trait GuestStorage: Send + Sync {
    /// Read the stored document, `None` when nothing was stored yet.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the document exists but cannot be read.
    fn load(&self) -> Result<Option<GuestDocument>, StorageError>;

    /// Replace the stored document.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the document cannot be written.
    fn save(&self, document: &GuestDocument) -> Result<(), StorageError>;
}

/// Guest document stored as JSON on disk.
#[derive(Debug, Clone)]
pub struct FileGuestStorage {
    path: PathBuf,
}

impl FileGuestStorage {
    /// Store the document at `path`. Parent directories are created on first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GuestStorage for FileGuestStorage {
    fn load(&self) -> Result<Option<GuestDocument>, StorageError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&self.path)(e)),
        };
        let document: GuestDocument = serde_json::from_str(&raw)?;
        if document.version != GUEST_DOCUMENT_VERSION {
            return Err(StorageError::UnsupportedVersion(document.version));
        }
        Ok(Some(document))
    }

    fn save(&self, document: &GuestDocument) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(document)?;
        write_atomic(&self.path, &json)
    }
}

/// Guest document held in memory (embedding and tests).
#[derive(Debug, Default)]
pub struct MemoryGuestStorage {
    document: Mutex<Option<GuestDocument>>,
}

impl MemoryGuestStorage {
    /// Start with `document` already stored.
    #[must_use]
    pub const fn with_document(document: GuestDocument) -> Self {
        Self {
            document: Mutex::new(Some(document)),
        }
    }

    /// The currently stored document.
    #[must_use]
    pub fn stored(&self) -> Option<GuestDocument> {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl GuestStorage for MemoryGuestStorage {
    fn load(&self) -> Result<Option<GuestDocument>, StorageError> {
        Ok(self.stored())
    }

    fn save(&self, document: &GuestDocument) -> Result<(), StorageError> {
        *self
            .document
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(document.clone());
        Ok(())
    }
}

// =============================================================================
// Token Store
// =============================================================================

/// Holder of the current access token.
///
/// Token issuance and refresh happen elsewhere; the engine only reads the
/// token, and clears it when the server reports the session as invalid.
pub trait TokenStore: Send + Sync {
    /// The current access token, if any.
    fn token(&self) -> Option<SecretString>;

    /// Replace the access token.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the token cannot be persisted.
    fn set_token(&self, token: SecretString) -> Result<(), StorageError>;

    /// Forget the access token.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the stored token cannot be removed.
    fn clear_token(&self) -> Result<(), StorageError>;
}

/// Access token stored in a file.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Store the token at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn token(&self) -> Option<SecretString> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let token = raw.trim();
                (!token.is_empty()).then(|| SecretString::from(token.to_owned()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read token file");
                None
            }
        }
    }

    fn set_token(&self, token: SecretString) -> Result<(), StorageError> {
        write_atomic(&self.path, token.expose_secret().as_bytes())
    }

    fn clear_token(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&self.path)(e)),
        }
    }
}

/// Access token held in memory.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<SecretString>>,
}

impl MemoryTokenStore {
    /// Start with `token` already stored.
    #[must_use]
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(SecretString::from(token.to_owned()))),
        }
    }
}

impl std::fmt::Debug for MemoryTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTokenStore")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl TokenStore for MemoryTokenStore {
    fn token(&self) -> Option<SecretString> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_token(&self, token: SecretString) -> Result<(), StorageError> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
        Ok(())
    }

    fn clear_token(&self) -> Result<(), StorageError> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Write `bytes` to a sibling temp file, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).map_err(io_error(&tmp))?;
    fs::rename(&tmp, path).map_err(io_error(path))
}
