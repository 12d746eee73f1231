//! Authenticated context for a batch: a bearer token and the server that
//! issued it. Passed explicitly to every submission; never renewed.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;

use crate::config::{ConfigError, CredentialStore, TOKEN_KEY, WEBSITE_KEY};

#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    endpoint: String,
    token: String,
}

#[derive(Deserialize)]
struct Claims {
    exp: Option<u64>,
}

impl Session {
    pub fn new(endpoint: &str, token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Session from the credential store. Without a stored token the session
    /// is anonymous and the server decides what that means.
    pub fn from_store(store: &CredentialStore) -> Self {
        Self::new(
            store.get(WEBSITE_KEY).unwrap_or_default(),
            store.get(TOKEN_KEY).unwrap_or_default(),
        )
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_anonymous(&self) -> bool {
        self.token.is_empty()
    }

    /// Writes the issuing endpoint and the token back to the store.
    pub fn persist(&self, store: &mut CredentialStore) -> Result<(), ConfigError> {
        store.set(WEBSITE_KEY, &self.endpoint);
        store.set(TOKEN_KEY, &self.token);
        store.save()
    }

    /// `exp` claim of a JWT token, in seconds since the epoch. `None` for
    /// tokens that are not JWTs or carry no expiry.
    pub fn expires_at(&self) -> Option<u64> {
        let claims = self.token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD.decode(claims.trim_end_matches('=')).ok()?;
        serde_json::from_slice::<Claims>(&bytes).ok()?.exp
    }

    /// Seconds until expiry at `now` (negative once expired).
    pub fn seconds_left(&self, now: u64) -> Option<i64> {
        self.expires_at().map(|exp| exp as i64 - now as i64)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("token", &if self.token.is_empty() { "" } else { "[REDACTED]" })
            .finish()
    }
}
