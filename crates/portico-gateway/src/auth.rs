//! Connection-level authentication.
//!
//! `validate` is pure with respect to connection state: the same
//! (auth payload, transport identity) pair always yields the same answer.
//! The token set is seeded from config and may be mutated at runtime by the
//! embedding process.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use portico_core::protocol::AuthPayload;

use crate::config::{AuthMode, AuthSection};

pub struct Authenticator {
    mode: AuthMode,
    password: Option<String>,
    tokens: RwLock<HashSet<String>>,
}

impl Authenticator {
    pub fn new(cfg: &AuthSection) -> Self {
        Self {
            mode: cfg.mode,
            password: cfg.password.clone(),
            tokens: RwLock::new(cfg.tokens.iter().cloned().collect()),
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Evaluate credentials against the configured mode.
    ///
    /// `transport_user` is the optional identity supplied by an upstream
    /// proxy (mTLS / `X-Forwarded-User`); it only matters in
    /// transport-identity mode.
    pub fn validate(&self, auth: Option<&AuthPayload>, transport_user: Option<&str>) -> bool {
        match self.mode {
            AuthMode::None => true,
            AuthMode::Token => auth
                .and_then(|a| a.token.as_deref())
                .map(|t| {
                    self.tokens
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .contains(t)
                })
                .unwrap_or(false),
            AuthMode::Password => {
                let presented = auth.and_then(|a| a.password.as_deref());
                presented.is_some() && presented == self.password.as_deref()
            }
            AuthMode::TransportIdentity => transport_user.is_some_and(|u| !u.is_empty()),
        }
    }

    pub fn add_token(&self, token: impl Into<String>) {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.into());
    }

    pub fn remove_token(&self, token: &str) -> bool {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token)
    }
}
