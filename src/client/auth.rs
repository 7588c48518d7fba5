//! Session negotiation.
//!
//! Obtains a usable session token: from the in-memory copy, then the
//! encrypted disk cache, and only then via a live login exchange. A
//! successful login stores the token in both places; a storage failure is
//! logged but never fails the login itself.

use tokio_util::sync::CancellationToken;

use super::{Client, RequestSpec};
use crate::cache::CacheError;
use crate::client::error::RequestError;
use crate::session::SessionToken;

/// Body prefix the WebUI returns on an accepted login.
const LOGIN_OK_PREFIX: &str = "Ok";

impl Client {
    /// Return a token from memory or the disk cache, if a valid one exists.
    fn cached_session(&mut self) -> Option<SessionToken> {
        if let Some(token) = &self.cached_token {
            if !token.is_expired() {
                return Some(token.clone());
            }
        }
        self.cached_token = None;

        let cache = self.cache.as_ref()?;
        match cache.retrieve(&self.identity) {
            Ok(token) => {
                self.cached_token = Some(token.clone());
                Some(token)
            }
            Err(e) => {
                // Any miss (absent, expired, corrupt) means a live login; the
                // cache has already self-healed where needed.
                tracing::debug!(error = %e, "no cached session token");
                None
            }
        }
    }

    fn remember_session(&mut self, token: SessionToken) -> Result<(), CacheError> {
        if token.is_expired() {
            return Err(CacheError::Expired);
        }
        self.cached_token = Some(token.clone());

        match &self.cache {
            Some(cache) => cache.store(&self.identity, &token),
            None => Ok(()),
        }
    }

    /// Drop the session token from memory and from the disk slot.
    pub fn clear_session(&mut self) -> Result<(), CacheError> {
        self.cached_token = None;
        match &self.cache {
            Some(cache) => cache.delete(&self.identity),
            None => Ok(()),
        }
    }

    /// Obtain a session token, cache-first.
    ///
    /// Returns the token and whether it came from cache. In force-auth mode
    /// the cache is bypassed and a login exchange always runs.
    pub(crate) async fn session_auth(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<(SessionToken, bool), RequestError> {
        if !self.force_auth {
            if let Some(token) = self.cached_session() {
                return Ok((token, true));
            }
        }

        let spec = RequestSpec::post("auth/login").with_form(vec![
            ("username".into(), self.identity.username().to_string()),
            ("password".into(), self.identity.password().to_string()),
        ]);

        let parts = self
            .execute(&spec, None, cancel)
            .await
            .map_err(|e| e.wrap(format!("authenticating {}", self.identity)))?;

        if parts.status != reqwest::StatusCode::OK {
            return Err(RequestError::fatal(format!(
                "authentication request for {} failed with status {}",
                self.identity, parts.status
            )));
        }
        let body = parts.text();
        if !body.starts_with(LOGIN_OK_PREFIX) {
            // Anything but the literal marker is a denial, not a transient
            // condition.
            return Err(RequestError::fatal(format!(
                "authentication denied for {}: {body}",
                self.identity
            )));
        }

        let token = parts.session_cookie.clone().ok_or_else(|| {
            RequestError::fatal(format!(
                "authentication denied for {}: no session cookie found",
                self.identity
            ))
        })?;

        tracing::debug!(
            identity = %self.identity,
            expires_at = ?token.expiry(),
            "authenticated successfully"
        );

        if let Err(e) = self.remember_session(token.clone()) {
            tracing::warn!(error = %e, "storing session token failed; session kept in memory");
        }

        // One fresh login satisfies a forced authentication; later attempts
        // in the same run reuse this token.
        self.force_auth = false;

        Ok((token, false))
    }
}
