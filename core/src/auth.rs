use crate::store::CredentialFile;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Access/refresh token pair for the signed-in user.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: None,
        }
    }

    pub fn expiring_in(mut self, seconds: Option<i64>) -> Self {
        self.expires_at = seconds.map(|secs| Utc::now() + Duration::seconds(secs));
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Authentication lifecycle notifications.
///
/// `SessionExpired` is the cue for a front end to send the user back to login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthEvent {
    SignedIn,
    Refreshed,
    SessionExpired { reason: String },
    SignedOut,
}

/// Holds the current credentials. Cloning shares the same slot.
#[derive(Clone)]
pub struct TokenStore {
    slot: Arc<RwLock<Option<Credentials>>>,
    file: Option<CredentialFile>,
}

impl TokenStore {
    pub fn in_memory() -> Self {
        Self {
            slot: Arc::new(RwLock::new(None)),
            file: None,
        }
    }

    /// Opens a store mirrored to `path`, hydrating it from any saved credentials.
    pub fn persistent(path: PathBuf) -> Self {
        let file = CredentialFile::new(path);
        let initial = match file.load() {
            Ok(credentials) => credentials,
            Err(err) => {
                tracing::warn!(%err, "ignoring unreadable credential file");
                None
            }
        };
        Self {
            slot: Arc::new(RwLock::new(initial)),
            file: Some(file),
        }
    }

    pub fn get(&self) -> Option<Credentials> {
        self.slot.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.slot.read().as_ref().map(|c| c.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.slot.read().as_ref().map(|c| c.refresh_token.clone())
    }

    pub fn has_token(&self) -> bool {
        self.slot.read().is_some()
    }

    pub fn set(&self, credentials: Credentials) {
        if let Some(file) = &self.file {
            if let Err(err) = file.save(&credentials) {
                tracing::warn!(%err, "failed to persist credentials");
            }
        }
        *self.slot.write() = Some(credentials);
    }

    pub fn clear(&self) {
        if let Some(file) = &self.file {
            if let Err(err) = file.remove() {
                tracing::warn!(%err, "failed to remove persisted credentials");
            }
        }
        self.slot.write().take();
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

pub(crate) fn auth_channel() -> broadcast::Sender<AuthEvent> {
    let (tx, _) = broadcast::channel(16);
    tx
}
