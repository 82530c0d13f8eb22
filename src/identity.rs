//! Identity provider seam.
//!
//! Sign-in itself happens elsewhere; the engine only needs to know who the
//! current owner is and which bearer token to present to the remote store.

use std::sync::{PoisonError, RwLock};

use crate::models::Owner;

/// Source of "current user id or none" plus the matching access token.
pub trait IdentityProvider: Send + Sync {
    /// Authenticated user id, or None for a guest.
    fn current_user_id(&self) -> Option<String>;

    /// Bearer token for the current user, if any.
    fn access_token(&self) -> Option<String>;

    fn current_owner(&self) -> Owner {
        Owner::from_user_id(self.current_user_id())
    }
}

#[derive(Debug, Clone)]
struct SignedIn {
    user_id: String,
    access_token: String,
}

/// Identity held in process memory, switched by `sign_in` / `sign_out`.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    state: RwLock<Option<SignedIn>>,
}

impl StaticIdentity {
    pub fn guest() -> Self {
        Self::default()
    }

    pub fn signed_in(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        let identity = Self::default();
        identity.sign_in(user_id, access_token);
        identity
    }

    pub fn sign_in(&self, user_id: impl Into<String>, access_token: impl Into<String>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = Some(SignedIn {
            user_id: user_id.into(),
            access_token: access_token.into(),
        });
    }

    pub fn sign_out(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = None;
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.user_id.clone())
    }

    fn access_token(&self) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.access_token.clone())
    }
}
