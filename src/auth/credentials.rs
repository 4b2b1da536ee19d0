//! Per-user OAuth credential records.
//!
//! The store is a narrow `get`/`put`/`remove` interface keyed by local user
//! id, deliberately independent of the HTTP session layer: the session only
//! maps a cookie to a user id, and everything token-shaped lives here.
//! Process-lifetime only — re-login repopulates it.

use std::collections::HashMap;
use std::sync::Mutex;

/// OAuth token material authorizing read access to one user's mailbox.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Default)]
pub struct CredentialStore {
    inner: Mutex<HashMap<i64, Credential>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: i64) -> Option<Credential> {
        self.inner.lock().expect("credential store poisoned").get(&user_id).cloned()
    }

    /// Replaces any existing credential for the user wholesale.
    pub fn put(&self, user_id: i64, credential: Credential) {
        self.inner
            .lock()
            .expect("credential store poisoned")
            .insert(user_id, credential);
    }

    pub fn remove(&self, user_id: i64) {
        self.inner.lock().expect("credential store poisoned").remove(&user_id);
    }
}
