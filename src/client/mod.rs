//! qBittorrent WebUI client.
//!
//! # Responsibilities
//! - Hold the connection identity, the encrypted token cache, and the live
//!   in-memory session token for one client instance
//! - Run every request through the retry engine: the prepare phase negotiates
//!   a session token, the attempt phase executes and classifies the call
//! - Expose the WebUI operations (login, logout, preferences, listening port)
//!
//! # Design Decisions
//! - Construction takes an explicit, validated [`ClientConfig`]; no builder
//!   options
//! - Redirects are disabled at the HTTP layer so a 3xx surfaces as the
//!   misconfiguration it is
//! - The in-memory token is local to this instance; concurrent instances for
//!   the same identity may each authenticate and overwrite the shared disk
//!   slot (accepted trade-off)

mod api;
mod auth;
pub mod error;
mod http;

pub use error::{ClientError, RequestError};
pub use http::{Payload, RequestSpec, ResponseParts};

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cache::TokenCache;
use crate::credentials::ConnectionIdentity;
use crate::resilience::{EngineError, Operation, RetryConfig, RetryEngine};
use crate::session::{Authenticator, SessionToken};

const API_VERSION: &str = "v2";

/// Name of the session cookie the WebUI issues on login.
pub const SESSION_COOKIE: &str = "SID";

/// Client parameters, consumed by [`Client::new`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Skip the cache and authenticate against the server unconditionally.
    pub force_auth: bool,
    /// Budget for one whole operation, including retries and waits.
    pub timeout: Option<Duration>,
    /// Attempts per operation; 0 means unbounded.
    pub max_attempts: u32,
    /// Baseline wait between attempts.
    pub retry_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            force_auth: false,
            timeout: Some(Duration::from_secs(30)),
            max_attempts: 1,
            retry_delay: Duration::ZERO,
        }
    }
}

/// Authenticated WebUI client for one connection identity.
pub struct Client {
    identity: ConnectionIdentity,
    cache: Option<TokenCache>,
    /// Live copy of the session token for this instance.
    cached_token: Option<SessionToken>,
    /// Latched when a rejected session's cache slot could not be cleaned up.
    force_auth: bool,
    http: reqwest::Client,
    base_endpoint: String,
    config: ClientConfig,
}

impl Client {
    pub fn new(
        identity: ConnectionIdentity,
        cache: Option<TokenCache>,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ClientError::invalid(format!("building HTTP client: {e}")))?;
        let base_endpoint = format!("{}/api/{API_VERSION}/", identity.base_url());

        Ok(Self {
            force_auth: config.force_auth,
            identity,
            cache,
            cached_token: None,
            http,
            base_endpoint,
            config,
        })
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    /// The session token currently held in memory, if any.
    pub fn session_token(&self) -> Option<&SessionToken> {
        self.cached_token.as_ref()
    }

    /// Execute one API request under the retry policy.
    ///
    /// Each attempt re-negotiates authentication in its prepare phase, so a
    /// rejected cached token is replaced by a fresh login on the next
    /// attempt.
    pub async fn fetch(
        &mut self,
        spec: &RequestSpec,
        auth: Authenticator,
        cancel: &CancellationToken,
    ) -> Result<ResponseParts, EngineError<RequestError>> {
        let engine = RetryEngine::new(
            format!("{} {}", spec.method, spec.path),
            RetryConfig {
                max_attempts: self.config.max_attempts,
                retry_delay: self.config.retry_delay,
                timeout: self.config.timeout,
            },
        );
        let mut op = FetchOperation {
            client: self,
            spec,
            auth,
            cancel: cancel.clone(),
            token: None,
            token_was_cached: false,
        };
        engine.run(&mut op, cancel).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("identity", &self.identity)
            .field("base_endpoint", &self.base_endpoint)
            .field("force_auth", &self.force_auth)
            .field("has_cache", &self.cache.is_some())
            .finish()
    }
}

/// One request run through the engine: prepare negotiates the token, attempt
/// performs and classifies the HTTP call.
struct FetchOperation<'a> {
    client: &'a mut Client,
    spec: &'a RequestSpec,
    auth: Authenticator,
    cancel: CancellationToken,
    token: Option<SessionToken>,
    token_was_cached: bool,
}

impl Operation for FetchOperation<'_> {
    type Output = ResponseParts;
    type Error = RequestError;

    async fn prepare(&mut self) -> Result<(), RequestError> {
        match self.auth {
            Authenticator::NoAuth => {
                self.token = None;
                self.token_was_cached = false;
            }
            Authenticator::Session => {
                let (token, was_cached) = self.client.session_auth(&self.cancel).await?;
                self.token = Some(token);
                self.token_was_cached = was_cached;
            }
        }
        Ok(())
    }

    async fn attempt(&mut self) -> Result<ResponseParts, RequestError> {
        let parts = self
            .client
            .execute(self.spec, self.token.as_ref(), &self.cancel)
            .await?;
        self.client.classify_status(&parts, self.token_was_cached)?;
        Ok(parts)
    }
}
