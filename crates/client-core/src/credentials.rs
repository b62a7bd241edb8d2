use std::{fmt, sync::Arc};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Session data obtained from a successful login.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub user_id: String,
    pub home_server: String,
    pub device_id: Option<String>,
    /// Cleared when the server reported the login as failed.
    pub valid: bool,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        user_id: impl Into<String>,
        home_server: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            user_id: user_id.into(),
            home_server: home_server.into(),
            device_id: None,
            valid: true,
        }
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("home_server", &self.home_server)
            .field("device_id", &self.device_id)
            .field("valid", &self.valid)
            .finish()
    }
}

/// Read-only view of the current bearer token.
pub trait CredentialSource: Send + Sync {
    /// `None` while logged out or when the stored credential is not valid.
    fn current_token(&self) -> Option<String>;
}

/// Shared, swappable session slot written by login/logout and read everywhere else.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<Option<Credential>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the session wholesale.
    pub fn set(&self, credential: Credential) {
        *self.inner.write() = Some(credential);
    }

    /// Drop the session; returns what was stored.
    pub fn clear(&self) -> Option<Credential> {
        self.inner.write().take()
    }

    pub fn current(&self) -> Option<Credential> {
        self.inner.read().clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.read().as_ref().map(|c| c.user_id.clone())
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.read().as_ref().is_some_and(|c| c.valid)
    }
}

impl CredentialSource for SessionStore {
    fn current_token(&self) -> Option<String> {
        self.inner
            .read()
            .as_ref()
            .filter(|c| c.valid)
            .map(|c| c.access_token.clone())
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("logged_in", &self.is_logged_in())
            .finish()
    }
}
