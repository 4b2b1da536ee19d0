//! Cookie-backed session registry.
//!
//! Sessions are opaque random ids handed to the browser in a cookie; the
//! server side maps them to a logged-in user id. The same table also parks
//! the anti-forgery state + PKCE verifier between `/gmail/login` and the
//! OAuth callback. In-process only — a restart logs everyone out.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

pub const SESSION_COOKIE: &str = "mailsense_sid";

/// State parked between the login redirect and the provider callback.
#[derive(Debug, Clone)]
pub struct PendingLogin {
    pub state: String,
    pub pkce_verifier: String,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    logins: Mutex<HashMap<String, i64>>,
    pending: Mutex<HashMap<String, PendingLogin>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_session_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn login(&self, session_id: &str, user_id: i64) {
        self.logins
            .lock()
            .expect("session store poisoned")
            .insert(session_id.to_string(), user_id);
    }

    pub fn user_for(&self, session_id: &str) -> Option<i64> {
        self.logins
            .lock()
            .expect("session store poisoned")
            .get(session_id)
            .copied()
    }

    /// Clears the login; returns the user id that was attached, if any.
    pub fn logout(&self, session_id: &str) -> Option<i64> {
        self.logins
            .lock()
            .expect("session store poisoned")
            .remove(session_id)
    }

    pub fn set_pending(&self, session_id: &str, pending: PendingLogin) {
        self.pending
            .lock()
            .expect("session store poisoned")
            .insert(session_id.to_string(), pending);
    }

    /// One-shot: the pending entry is consumed so a replayed callback fails.
    pub fn take_pending(&self, session_id: &str) -> Option<PendingLogin> {
        self.pending
            .lock()
            .expect("session store poisoned")
            .remove(session_id)
    }
}
