// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP wiring for the admission pipeline.
//!
//! Every guarded request flows origin check → per-IP rate limit →
//! (protected routes only) bearer authentication → handler. Each gate
//! aborts the pipeline on failure; nothing downstream runs for a denied
//! request.

use crate::auth::{AuthError, TokenAuthenticator};
use crate::directory::{User, UserDirectory};
use crate::limiter::{ClientRegistry, RateLimitResult};
use crate::origin::{OriginError, OriginPolicy};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: ClientRegistry,
    pub origin_policy: Arc<OriginPolicy>,
    pub authenticator: Arc<TokenAuthenticator>,
    pub directory: Arc<dyn UserDirectory>,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

/// The authenticated principal, attached to the request by `require_auth`.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Build the service router with the full admission pipeline applied.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/whoami", get(whoami))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let guarded = Router::new()
        .route("/login", post(login))
        .merge(protected)
        // Layers run outermost-first: origin check, then rate limit.
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_per_ip))
        .layer(middleware::from_fn_with_state(state.clone(), restrict_origin));

    Router::new()
        .route("/health", get(health))
        .merge(guarded)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "comment-admission",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Origin allow-list gate. Denials are 403 with a reason body.
pub async fn restrict_origin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let origin = header_str(&request, header::ORIGIN);
    let referer = header_str(&request, header::REFERER);

    match state.origin_policy.check(origin, referer) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            info!(origin = ?origin, referer = ?referer, error = %err, "origin denied");
            (
                StatusCode::FORBIDDEN,
                Json(ErrorResponse {
                    error: err.to_string(),
                    code: origin_code(&err),
                    retry_after_secs: None,
                }),
            )
                .into_response()
        }
    }
}

/// Per-IP admission gate. Runs before authentication so unauthenticated
/// traffic is throttled too; denials are 429 and never reach a handler.
pub async fn rate_limit_per_ip(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let ip = addr.ip();
    match state.registry.check(ip) {
        RateLimitResult::Allowed { remaining } => {
            debug!(%ip, remaining, "request admitted");
            next.run(request).await
        }
        RateLimitResult::Limited { retry_after } => {
            let retry_secs = retry_after.as_secs().max(1);
            info!(%ip, retry_secs, "request rate limited");
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_secs.to_string())],
                Json(ErrorResponse {
                    error: "rate limit exceeded".to_string(),
                    code: "RATE_LIMITED",
                    retry_after_secs: Some(retry_secs),
                }),
            )
                .into_response()
        }
    }
}

/// Bearer authentication gate for protected routes. On success the
/// resolved principal is attached to the request as [`CurrentUser`].
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = header_str(&request, header::AUTHORIZATION);

    match state
        .authenticator
        .authenticate(auth_header, state.directory.as_ref())
        .await
    {
        Ok(user) => {
            request.extensions_mut().insert(CurrentUser(user));
            next.run(request).await
        }
        Err(err) => {
            info!(error = %err, "authentication failed");
            (
                auth_status(&err),
                Json(ErrorResponse {
                    error: err.to_string(),
                    code: auth_code(&err),
                    retry_after_secs: None,
                }),
            )
                .into_response()
        }
    }
}

/// Exchange login credentials for a bearer token.
pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Response {
    match state.directory.verify_password(&req.email, &req.password).await {
        Some(user) => match state.authenticator.issue(user.id) {
            Ok(token) => {
                info!(user_id = user.id, "login succeeded");
                (StatusCode::OK, Json(LoginResponse { token })).into_response()
            }
            Err(err) => {
                warn!(user_id = user.id, error = %err, "token signing failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: err.to_string(),
                        code: "TOKEN_SIGNING",
                        retry_after_secs: None,
                    }),
                )
                    .into_response()
            }
        },
        None => {
            info!(email = %req.email, "login rejected");
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "invalid email or password".to_string(),
                    code: "BAD_CREDENTIALS",
                    retry_after_secs: None,
                }),
            )
                .into_response()
        }
    }
}

/// Echo the authenticated principal.
pub async fn whoami(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Json<User> {
    Json(user)
}

fn header_str<'a>(request: &'a Request, name: header::HeaderName) -> Option<&'a str> {
    request.headers().get(name).and_then(|v| v.to_str().ok())
}

fn origin_code(err: &OriginError) -> &'static str {
    match err {
        OriginError::MissingSource => "ORIGIN_MISSING",
        OriginError::UnverifiableSource(_) => "ORIGIN_UNVERIFIABLE",
        OriginError::UntrustedSource(_) => "ORIGIN_DENIED",
    }
}

fn auth_code(err: &AuthError) -> &'static str {
    match err {
        AuthError::MissingCredentials => "AUTH_MISSING",
        AuthError::Malformed => "AUTH_MALFORMED",
        AuthError::BadSignature => "AUTH_BAD_SIGNATURE",
        AuthError::ExpiredOrPremature => "AUTH_OUT_OF_WINDOW",
        AuthError::UnknownSubject => "AUTH_UNKNOWN_SUBJECT",
        AuthError::LastSeenWriteFailed => "AUTH_WRITE_FAILED",
        AuthError::TokenSigning => "TOKEN_SIGNING",
    }
}

fn auth_status(err: &AuthError) -> StatusCode {
    match err {
        // The activity-record write is a server-side fault, not a bad
        // credential; everything else is unauthorized.
        AuthError::LastSeenWriteFailed | AuthError::TokenSigning => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::UNAUTHORIZED,
    }
}
