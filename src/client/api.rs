//! WebUI operations built on the request core.

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::{Client, RequestSpec};
use crate::client::error::ClientError;
use crate::session::Authenticator;

impl Client {
    /// Authenticate (caching the session) and return the server version.
    pub async fn login(&mut self, cancel: &CancellationToken) -> Result<String, ClientError> {
        let parts = self
            .fetch(&RequestSpec::get("app/version"), Authenticator::Session, cancel)
            .await
            .map_err(|e| ClientError::request(format!("login for {}", self.identity), e))?;
        Ok(parts.text().into_owned())
    }

    /// End the session server-side, then clear the cached token either way.
    pub async fn logout(&mut self, cancel: &CancellationToken) -> Result<(), ClientError> {
        if self.session_token().is_none() && self.cache_miss() {
            tracing::warn!("no valid session token found; presuming already logged out");
            return Ok(());
        }

        let result = self
            .fetch(&RequestSpec::post("auth/logout"), Authenticator::Session, cancel)
            .await;

        if let Err(e) = self.clear_session() {
            tracing::error!(error = %e, "cleaning up session cache failed");
        }

        result
            .map(|_| ())
            .map_err(|e| ClientError::request(format!("logout for {}", self.identity), e))
    }

    /// Fetch the full preferences object.
    pub async fn preferences(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Map<String, Value>, ClientError> {
        let parts = self
            .fetch(&RequestSpec::get("app/preferences"), Authenticator::Session, cancel)
            .await
            .map_err(|e| ClientError::request("getting preferences", e))?;

        let value: Value = serde_json::from_slice(&parts.body)
            .map_err(|e| ClientError::invalid(format!("decoding preferences: {e}")))?;
        match value {
            Value::Object(prefs) => Ok(prefs),
            _ => Err(ClientError::invalid("invalid preferences")),
        }
    }

    /// Fetch a single preference entry by key.
    pub async fn preference_entry(
        &mut self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, ClientError> {
        let prefs = self.preferences(cancel).await?;
        prefs
            .get(key)
            .cloned()
            .ok_or_else(|| ClientError::invalid(format!("missing '{key}' from preferences")))
    }

    /// Apply a partial preferences update.
    pub async fn set_preferences(
        &mut self,
        prefs: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        let payload = serde_json::to_string(prefs)
            .map_err(|e| ClientError::invalid(format!("encoding preferences: {e}")))?;

        let spec = RequestSpec::post("app/setPreferences")
            .with_form(vec![("json".into(), payload.clone())]);
        self.fetch(&spec, Authenticator::Session, cancel)
            .await
            .map_err(|e| ClientError::request("setting preferences", e))?;

        tracing::info!(payload = %payload, "preferences set");
        Ok(())
    }

    /// Read the listening port, tolerating numeric or string encodings.
    pub async fn listening_port(&mut self, cancel: &CancellationToken) -> Result<u16, ClientError> {
        let value = self.preference_entry("listen_port", cancel).await?;
        match &value {
            Value::Number(n) => n
                .as_u64()
                .and_then(|n| u16::try_from(n).ok())
                .ok_or_else(|| ClientError::invalid(format!("invalid listening port: {value}"))),
            Value::String(s) => s
                .parse::<u16>()
                .map_err(|_| ClientError::invalid(format!("invalid listening port: {s}"))),
            _ => Err(ClientError::invalid(format!(
                "invalid listening port: {value}"
            ))),
        }
    }

    /// Set the listening port preference.
    pub async fn set_listening_port(
        &mut self,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        let mut prefs = Map::new();
        prefs.insert("listen_port".into(), Value::from(port));
        self.set_preferences(&prefs, cancel).await?;

        tracing::info!(port, "listening port set");
        Ok(())
    }

    /// Whether neither memory nor disk currently holds a session token.
    fn cache_miss(&self) -> bool {
        match &self.cache {
            Some(cache) => cache.retrieve(&self.identity).is_err(),
            None => true,
        }
    }
}
