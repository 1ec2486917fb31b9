//! Explicit session context: token, identity, and remaining quota
//!
//! Initialised on login and cleared on logout. There are no process-wide
//! reads; everything that needs credentials holds a clone of this handle.

use std::sync::Arc;

use parking_lot::Mutex;
use rill_api::AuthSession;

/// Authenticated user identity
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub username: String,
    pub email: String,
}

#[derive(Default)]
struct ContextInner {
    token: Option<String>,
    user: Option<AuthUser>,
    remaining_quota: Option<i64>,
}

/// Shared session context. Cloning is cheap; all clones observe the same
/// state.
#[derive(Clone, Default)]
pub struct SessionContext {
    inner: Arc<Mutex<ContextInner>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a validated token and the identity it resolved to
    pub(crate) fn install(&self, token: String, auth: AuthSession) {
        let mut inner = self.inner.lock();
        inner.token = Some(token);
        inner.user = Some(AuthUser {
            username: auth.username,
            email: auth.email,
        });
        inner.remaining_quota = Some(auth.remaining_quota);
    }

    /// Refresh identity and quota from a re-validation
    pub(crate) fn update(&self, auth: AuthSession) {
        let mut inner = self.inner.lock();
        inner.user = Some(AuthUser {
            username: auth.username,
            email: auth.email,
        });
        inner.remaining_quota = Some(auth.remaining_quota);
    }

    /// Clear everything (logout)
    pub fn clear(&self) {
        *self.inner.lock() = ContextInner::default();
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.lock().token.is_some()
    }

    pub fn token(&self) -> Option<String> {
        self.inner.lock().token.clone()
    }

    pub fn user(&self) -> Option<AuthUser> {
        self.inner.lock().user.clone()
    }

    /// Remaining request quota, if known
    pub fn remaining_quota(&self) -> Option<i64> {
        self.inner.lock().remaining_quota
    }
}
