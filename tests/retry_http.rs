//! End-to-end retry and session negotiation tests against a stub WebUI.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use qbcli::cache::TokenCache;
use qbcli::{Client, ClientConfig, ConnectionIdentity, SessionToken};

mod common;
use common::{start_stub_server, StubResponse};

fn identity(port: u16) -> ConnectionIdentity {
    ConnectionIdentity::new("http", "127.0.0.1", port, "admin", "hunter2").unwrap()
}

fn retrying_config(max_attempts: u32) -> ClientConfig {
    ClientConfig {
        force_auth: false,
        timeout: Some(Duration::from_secs(10)),
        max_attempts,
        retry_delay: Duration::ZERO,
    }
}

#[tokio::test]
async fn test_transient_statuses_are_retried_until_success() {
    let logins = Arc::new(AtomicU32::new(0));
    let fetches = Arc::new(AtomicU32::new(0));
    let (l, f) = (logins.clone(), fetches.clone());

    let addr = start_stub_server(move |request| {
        let (l, f) = (l.clone(), f.clone());
        async move {
            if request.contains("auth/login") {
                l.fetch_add(1, Ordering::SeqCst);
                return StubResponse::new(200, "Ok.")
                    .with_header("Set-Cookie", "SID=tok123; path=/");
            }
            match f.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => StubResponse::new(503, "Service Unavailable"),
                _ => StubResponse::new(200, r#"{"listen_port": 6881}"#),
            }
        }
    })
    .await;

    let mut client = Client::new(identity(addr.port()), None, retrying_config(3)).unwrap();
    let cancel = CancellationToken::new();

    let prefs = client.preferences(&cancel).await.unwrap();
    assert_eq!(prefs["listen_port"], 6881);

    // Two 503s and one success; the in-memory token kept later attempts from
    // logging in again.
    assert_eq!(fetches.load(Ordering::SeqCst), 3);
    assert_eq!(logins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejected_cached_token_triggers_one_fresh_login() {
    let logins = Arc::new(AtomicU32::new(0));
    let l = logins.clone();

    let addr = start_stub_server(move |request| {
        let l = l.clone();
        async move {
            if request.contains("auth/login") {
                l.fetch_add(1, Ordering::SeqCst);
                return StubResponse::new(200, "Ok.")
                    .with_header("Set-Cookie", "SID=fresh-sid; path=/");
            }
            if request.contains("SID=stale-sid") {
                return StubResponse::new(403, "Forbidden");
            }
            StubResponse::new(200, "4.6.0")
        }
    })
    .await;

    let id = identity(addr.port());
    let dir = tempfile::tempdir().unwrap();
    let cache = TokenCache::new(dir.path());
    cache.store(&id, &SessionToken::new("stale-sid", None)).unwrap();

    let mut client = Client::new(id.clone(), Some(cache.clone()), retrying_config(2)).unwrap();
    let cancel = CancellationToken::new();

    let version = client.login(&cancel).await.unwrap();
    assert_eq!(version, "4.6.0");
    assert_eq!(logins.load(Ordering::SeqCst), 1);

    // The stale slot was replaced by the fresh token.
    assert_eq!(cache.retrieve(&id).unwrap().value(), "fresh-sid");
}

#[tokio::test]
async fn test_forced_auth_logs_in_once_then_reuses_session() {
    let logins = Arc::new(AtomicU32::new(0));
    let fetches = Arc::new(AtomicU32::new(0));
    let (l, f) = (logins.clone(), fetches.clone());

    let addr = start_stub_server(move |request| {
        let (l, f) = (l.clone(), f.clone());
        async move {
            if request.contains("auth/login") {
                l.fetch_add(1, Ordering::SeqCst);
                return StubResponse::new(200, "Ok.")
                    .with_header("Set-Cookie", "SID=forced-sid; path=/");
            }
            match f.fetch_add(1, Ordering::SeqCst) {
                0 => StubResponse::new(503, "Service Unavailable"),
                _ => StubResponse::new(200, "4.6.0"),
            }
        }
    })
    .await;

    let id = identity(addr.port());
    let dir = tempfile::tempdir().unwrap();
    let cache = TokenCache::new(dir.path());
    cache.store(&id, &SessionToken::new("cached-sid", None)).unwrap();

    let mut client = Client::new(
        id,
        Some(cache),
        ClientConfig {
            force_auth: true,
            ..retrying_config(3)
        },
    )
    .unwrap();
    let cancel = CancellationToken::new();

    let version = client.login(&cancel).await.unwrap();
    assert_eq!(version, "4.6.0");

    // Forcing authentication bypasses the cached token exactly once; the
    // retry after the 503 reuses the freshly issued session.
    assert_eq!(logins.load(Ordering::SeqCst), 1);
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_denied_login_is_fatal_and_not_retried() {
    let logins = Arc::new(AtomicU32::new(0));
    let l = logins.clone();

    let addr = start_stub_server(move |request| {
        let l = l.clone();
        async move {
            if request.contains("auth/login") {
                l.fetch_add(1, Ordering::SeqCst);
                return StubResponse::new(200, "Fails.");
            }
            StubResponse::new(200, "4.6.0")
        }
    })
    .await;

    let mut client = Client::new(identity(addr.port()), None, retrying_config(3)).unwrap();
    let cancel = CancellationToken::new();

    let err = client.login(&cancel).await.unwrap_err();
    assert!(err.to_string().contains("denied"), "{err}");
    assert_eq!(logins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fatal_status_aborts_immediately() {
    let fetches = Arc::new(AtomicU32::new(0));
    let f = fetches.clone();

    let addr = start_stub_server(move |request| {
        let f = f.clone();
        async move {
            if request.contains("auth/login") {
                return StubResponse::new(200, "Ok.")
                    .with_header("Set-Cookie", "SID=tok; path=/");
            }
            f.fetch_add(1, Ordering::SeqCst);
            StubResponse::new(404, "Not Found")
        }
    })
    .await;

    let mut client = Client::new(identity(addr.port()), None, retrying_config(5)).unwrap();
    let cancel = CancellationToken::new();

    let err = client.preferences(&cancel).await.unwrap_err();
    assert!(err.to_string().contains("404"), "{err}");
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}
