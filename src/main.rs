// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Comment Admission Gate
//!
//! Ingress service guarding the public comment API: per-IP rate limiting,
//! origin allow-listing and bearer token authentication, applied in that
//! order before any request reaches a handler.
//!
//! ## Configuration
//!
//! Loaded from environment variables:
//!
//! - `BIND_ADDR`: Server bind address (default: 0.0.0.0:8080)
//! - `JWT_SECRET`: HMAC signing secret (required)
//! - `ALLOWED_DOMAINS`: Comma-separated trusted origins, exact or
//!   `*.wildcard` (required, must be non-empty)
//! - `RATE_LIMIT_BURST`: Bucket capacity per IP (default: 3)
//! - `RATE_LIMIT_PER_SEC`: Token refill rate (default: 1.0)
//! - `IDLE_EVICT_SECS`: Idle threshold before eviction (default: 600)
//! - `SWEEP_INTERVAL_SECS`: Eviction sweep period (default: 300)
//! - `TOKEN_TTL_HOURS`: Minted token lifetime (default: 72)

use anyhow::Context;
use axum::serve;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use comment_admission::{
    config::{AuthConfig, Config, OriginConfig, RateLimitConfig},
    directory::MemoryDirectory,
    handlers::{router, AppState},
    limiter::ClientRegistry,
    auth::TokenAuthenticator,
    origin::OriginPolicy,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // Load configuration
    let config = load_config();
    info!(
        bind_addr = %config.bind_addr,
        burst_capacity = config.rate_limit.burst_capacity,
        refill_per_sec = config.rate_limit.refill_per_sec,
        idle_evict_secs = config.rate_limit.idle_evict_secs,
        allowed_domains = config.origin.allowed_domains.len(),
        "Starting comment admission gate"
    );

    // An empty allow-list, empty secret or unusable refill rate is fatal.
    let origin_policy = OriginPolicy::from_patterns(&config.origin.allowed_domains)
        .context("ALLOWED_DOMAINS must list at least one trusted origin")?;
    if config.auth.jwt_secret.is_empty() {
        anyhow::bail!("JWT_SECRET must be set");
    }
    config
        .rate_limit
        .validate()
        .context("RATE_LIMIT_PER_SEC is not a usable refill rate")?;

    let registry = ClientRegistry::new(config.rate_limit.clone());
    let authenticator = TokenAuthenticator::new(
        config.auth.jwt_secret.as_bytes(),
        config.auth.token_ttl(),
    );

    // The in-memory directory stands in for the comment service's user
    // store; deployments substitute a database-backed implementation.
    let directory = Arc::new(MemoryDirectory::new());

    let state = AppState {
        registry: registry.clone(),
        origin_policy: Arc::new(origin_policy),
        authenticator: Arc::new(authenticator),
        directory,
    };

    // Spawn the idle-eviction sweep for the lifetime of the process.
    let idle_threshold = config.rate_limit.idle_threshold();
    let sweep_interval = config.rate_limit.sweep_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            let evicted = registry.evict_idle(idle_threshold);
            if evicted > 0 {
                info!(evicted, "Evicted idle clients");
            }
        }
    });

    let app = router(state);

    // Start server
    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Load configuration from environment variables.
fn load_config() -> Config {
    Config {
        bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        rate_limit: RateLimitConfig {
            burst_capacity: env_parsed("RATE_LIMIT_BURST", 3),
            refill_per_sec: env_parsed("RATE_LIMIT_PER_SEC", 1.0),
            idle_evict_secs: env_parsed("IDLE_EVICT_SECS", 600),
            sweep_interval_secs: env_parsed("SWEEP_INTERVAL_SECS", 300),
        },
        origin: OriginConfig {
            allowed_domains: std::env::var("ALLOWED_DOMAINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        },
        auth: AuthConfig {
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or_default(),
            token_ttl_hours: env_parsed("TOKEN_TTL_HOURS", 72),
        },
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
