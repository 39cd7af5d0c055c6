// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests through the real router: origin gate, per-IP rate
//! limit and bearer authentication, in pipeline order.

use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use comment_admission::{
    auth::TokenAuthenticator,
    config::RateLimitConfig,
    directory::MemoryDirectory,
    handlers::{router, AppState},
    limiter::ClientRegistry,
    origin::OriginPolicy,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const SECRET: &[u8] = b"pipeline-secret";
const TTL: Duration = Duration::from_secs(3600);
const GOOD_ORIGIN: &str = "https://blog.example.com";

struct Harness {
    app: Router,
    authenticator: Arc<TokenAuthenticator>,
    directory: Arc<MemoryDirectory>,
}

fn harness(burst: u32, peer: &str) -> Harness {
    let directory = Arc::new(MemoryDirectory::new());
    directory.insert(1, "alice", "alice@example.com", "hunter2");

    let authenticator = Arc::new(TokenAuthenticator::new(SECRET, TTL));
    let state = AppState {
        registry: ClientRegistry::new(RateLimitConfig {
            burst_capacity: burst,
            ..Default::default()
        }),
        origin_policy: Arc::new(OriginPolicy::from_patterns(&["*.example.com"]).unwrap()),
        authenticator: authenticator.clone(),
        directory: directory.clone(),
    };

    let addr: SocketAddr = peer.parse().unwrap();
    Harness {
        app: router(state).layer(MockConnectInfo(addr)),
        authenticator,
        directory,
    }
}

fn get(path: &str, origin: Option<&str>, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(path);
    if let Some(origin) = origin {
        builder = builder.header(header::ORIGIN, origin);
    }
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn burst_then_deny_then_recover() {
    let h = harness(3, "203.0.113.7:40000");
    let token = h.authenticator.issue(1).unwrap();

    // Capacity of 3: three admitted, fourth denied.
    for i in 0..3 {
        let response = h
            .app
            .clone()
            .oneshot(get("/whoami", Some(GOOD_ORIGIN), Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {}", i + 1);
    }

    let response = h
        .app
        .clone()
        .oneshot(get("/whoami", Some(GOOD_ORIGIN), Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    // One refill interval later a single request is admitted again.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let response = h
        .app
        .clone()
        .oneshot(get("/whoami", Some(GOOD_ORIGIN), Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn untrusted_or_missing_origin_is_forbidden() {
    let h = harness(10, "203.0.113.8:40000");
    let token = h.authenticator.issue(1).unwrap();

    let response = h
        .app
        .clone()
        .oneshot(get("/whoami", Some("https://evil.com"), Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = h
        .app
        .clone()
        .oneshot(get("/whoami", None, Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Referer works as a fallback source.
    let request = Request::builder()
        .uri("/whoami")
        .header(header::REFERER, "https://blog.example.com/thread/42")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn authentication_failures_are_unauthorized() {
    let h = harness(10, "203.0.113.9:40000");

    // No credentials
    let response = h
        .app
        .clone()
        .oneshot(get("/whoami", Some(GOOD_ORIGIN), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Token signed with another secret
    let forged = TokenAuthenticator::new(b"other-secret", TTL).issue(1).unwrap();
    let response = h
        .app
        .clone()
        .oneshot(get("/whoami", Some(GOOD_ORIGIN), Some(&forged)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Token for a subject the directory does not know
    let unknown = h.authenticator.issue(999).unwrap();
    let response = h
        .app
        .clone()
        .oneshot(get("/whoami", Some(GOOD_ORIGIN), Some(&unknown)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn failed_activity_write_is_a_server_error() {
    let h = harness(10, "203.0.113.10:40000");
    let token = h.authenticator.issue(1).unwrap();
    h.directory.fail_last_login_writes(true);

    let response = h
        .app
        .clone()
        .oneshot(get("/whoami", Some(GOOD_ORIGIN), Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn login_issues_a_usable_token() {
    let h = harness(10, "203.0.113.11:40000");

    let request = Request::builder()
        .method("POST")
        .uri("/login")
        .header(header::ORIGIN, GOOD_ORIGIN)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            r#"{"email":"alice@example.com","password":"hunter2"}"#,
        ))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let token = parsed["token"].as_str().unwrap();

    let response = h
        .app
        .clone()
        .oneshot(get("/whoami", Some(GOOD_ORIGIN), Some(token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_rejects_bad_credentials() {
    let h = harness(10, "203.0.113.12:40000");

    let request = Request::builder()
        .method("POST")
        .uri("/login")
        .header(header::ORIGIN, GOOD_ORIGIN)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            r#"{"email":"alice@example.com","password":"wrong"}"#,
        ))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_is_reachable_without_origin() {
    let h = harness(10, "203.0.113.13:40000");

    let response = h
        .app
        .clone()
        .oneshot(get("/health", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
