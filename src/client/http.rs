//! Request preparation, execution, and outcome classification.
//!
//! # Responsibilities
//! - Build requests against the WebUI API endpoint (Origin/Referer headers,
//!   query parameters, form or JSON payloads, session cookie)
//! - Execute one request, racing the cancellation token
//! - Map network and status outcomes into transient/fatal classifications
//! - Parse `Retry-After` (integer seconds or HTTP date) into a wait floor

use chrono::{DateTime, Utc};
use reqwest::header::{self, HeaderMap};
use reqwest::{Method, StatusCode};
use std::borrow::Cow;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{Client, SESSION_COOKIE};
use crate::client::error::RequestError;
use crate::session::SessionToken;

/// Request payload, already shaped for the wire.
#[derive(Debug, Clone)]
pub enum Payload {
    /// `application/x-www-form-urlencoded` fields.
    Form(Vec<(String, String)>),
    /// `application/json` body.
    Json(serde_json::Value),
}

/// One logical API request: relative path, method, query, payload.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub payload: Option<Payload>,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            payload: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_form(mut self, fields: Vec<(String, String)>) -> Self {
        self.payload = Some(Payload::Form(fields));
        self
    }

    pub fn with_json(mut self, value: serde_json::Value) -> Self {
        self.payload = Some(Payload::Json(value));
        self
    }
}

/// Raw response surface the caller decodes: status metadata plus body bytes.
#[derive(Debug, Clone)]
pub struct ResponseParts {
    pub status: StatusCode,
    /// Parsed `Retry-After` value, if the header was present and parseable.
    pub retry_after: Option<Duration>,
    /// Session token extracted from the response's session cookie, if any.
    pub session_cookie: Option<SessionToken>,
    pub body: Vec<u8>,
}

impl ResponseParts {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

impl Client {
    fn build_url(&self, spec: &RequestSpec) -> Result<Url, RequestError> {
        let mut url = Url::parse(&self.base_endpoint)
            .and_then(|base| base.join(&spec.path))
            .map_err(|e| RequestError::fatal(format!("building request URL: {e}")))?;
        if !spec.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&spec.query);
        }
        Ok(url)
    }

    fn prepare(
        &self,
        spec: &RequestSpec,
        token: Option<&SessionToken>,
    ) -> Result<reqwest::RequestBuilder, RequestError> {
        let url = self.build_url(spec)?;
        let base = self.identity.base_url();

        // The WebUI's CSRF protection requires both headers on every call.
        let mut req = self
            .http
            .request(spec.method.clone(), url)
            .header(header::ORIGIN, &base)
            .header(header::REFERER, &base);

        if let Some(token) = token {
            req = req.header(header::COOKIE, format!("{SESSION_COOKIE}={}", token.value()));
        }

        match &spec.payload {
            Some(Payload::Form(fields)) => req = req.form(fields),
            Some(Payload::Json(value)) => req = req.json(value),
            None => {}
        }

        tracing::debug!(method = %spec.method, path = %spec.path, "request prepared");
        Ok(req)
    }

    /// Issue one HTTP request and collect the raw response.
    ///
    /// Network failures are classified here (timeout and connection refusal
    /// are transient, everything else fatal); the status code is classified
    /// separately by [`Client::classify_status`].
    pub(crate) async fn execute(
        &self,
        spec: &RequestSpec,
        token: Option<&SessionToken>,
        cancel: &CancellationToken,
    ) -> Result<ResponseParts, RequestError> {
        let req = self.prepare(spec, token)?;

        tracing::debug!(method = %spec.method, path = %spec.path, "executing HTTP request");
        let resp = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(RequestError::fatal("request canceled"));
            }
            resp = req.send() => resp.map_err(classify_send_error)?,
        };

        let status = resp.status();
        let retry_after = parse_retry_after(resp.headers());
        let session_cookie = resp
            .cookies()
            .find(|cookie| cookie.name() == SESSION_COOKIE)
            .map(|cookie| {
                SessionToken::new(
                    cookie.value(),
                    cookie.expires().map(DateTime::<Utc>::from),
                )
            });

        let body = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(RequestError::fatal("request canceled"));
            }
            body = resp.bytes() => body.map_err(|e| {
                if e.is_timeout() {
                    RequestError::transient(format!("request timed out: {e}"))
                } else {
                    RequestError::fatal(format!("failed reading response body: {e}"))
                }
            })?,
        };

        tracing::debug!(status = %status, bytes = body.len(), "response received");
        Ok(ResponseParts {
            status,
            retry_after,
            session_cookie,
            body: body.to_vec(),
        })
    }

    /// Classify the response status, with the session-rejection side effects.
    ///
    /// `auth_cached` marks whether the request carried a token that came from
    /// the cache rather than a fresh login. A rejected cached token is evicted
    /// and reported transient so the retry loop re-authenticates once; a
    /// rejected fresh token is final.
    pub(crate) fn classify_status(
        &mut self,
        parts: &ResponseParts,
        auth_cached: bool,
    ) -> Result<(), RequestError> {
        let status = parts.status;

        if status.is_success() {
            return Ok(());
        }
        if status.is_redirection() {
            // Redirects signal misconfiguration, never a retryable state.
            return Err(RequestError::fatal(format!(
                "unexpected redirection: {status}"
            )));
        }
        if status == StatusCode::UNAUTHORIZED
            || (status == StatusCode::FORBIDDEN && auth_cached)
        {
            let cleanup_failed = match self.clear_session() {
                Ok(()) => false,
                Err(e) => {
                    self.force_auth = true;
                    tracing::warn!(error = %e, "failed to clean up rejected session cache");
                    true
                }
            };
            // A rejected fresh token is final no matter how the cleanup went;
            // only a cached token earns the one re-authentication cycle.
            return Err(if !auth_cached {
                RequestError::fatal(format!("authentication rejected: {status}"))
            } else if cleanup_failed {
                RequestError::transient(
                    "cached authentication failed; failed to clean up cache; forcing re-authentication",
                )
            } else {
                RequestError::transient(
                    "cached authentication rejected; cached credentials removed",
                )
            });
        }
        if is_transient_status(status) {
            return Err(RequestError::transient_with_delay(
                format!("transient error: {status}"),
                parts.retry_after,
            ));
        }
        Err(RequestError::fatal(format!("unexpected response: {status}")))
    }
}

fn classify_send_error(e: reqwest::Error) -> RequestError {
    if e.is_timeout() {
        RequestError::transient(format!("request timed out: {e}"))
    } else if e.is_connect() {
        RequestError::transient(format!("connection refused: {e}"))
    } else {
        RequestError::fatal(format!("failed before receiving response: {e}"))
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Parse a `Retry-After` header as either integer seconds or an HTTP date.
/// Unparseable values are ignored without penalty.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(header::RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        let until = date.with_timezone(&Utc) - Utc::now();
        return Some(until.to_std().unwrap_or(Duration::ZERO));
    }
    None
}
