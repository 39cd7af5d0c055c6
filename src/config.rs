// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the comment admission gate.
//!
//! Every knob can be supplied through the environment (see `main.rs`) and
//! falls back to the defaults below, which match the observed
//! burst-then-steady traffic shape of the comment frontend.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Fatal configuration problems detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("origin allow-list is empty; refusing to run as allow-all")]
    EmptyAllowList,

    #[error("signing secret is empty")]
    MissingSecret,

    #[error("refill rate must be a positive, finite number of tokens per second, got {0}")]
    InvalidRefillRate(f64),
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Per-IP rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Origin allow-list configuration
    #[serde(default)]
    pub origin: OriginConfig,

    /// Bearer token configuration
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Per-IP token bucket and eviction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket capacity, i.e. the tolerated burst size (default: 3)
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: u32,

    /// Token refill rate per second (default: 1.0)
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,

    /// Seconds without a request before a client entry is evicted
    /// (default: 600)
    #[serde(default = "default_idle_evict_secs")]
    pub idle_evict_secs: u64,

    /// Period of the background eviction sweep in seconds (default: 300)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// Trusted request origins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Exact hosts (`comments.example.com`, `example.com:8443`) or
    /// wildcard subdomain patterns (`*.example.com`). An empty list is a
    /// startup error, never an implicit allow-all.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

/// Bearer token settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC signing secret, shared with nothing else.
    #[serde(default)]
    pub jwt_secret: String,

    /// Minted token lifetime in hours (default: 72)
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u64,
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_burst_capacity() -> u32 {
    3
}

fn default_refill_per_sec() -> f64 {
    1.0
}

fn default_idle_evict_secs() -> u64 {
    600 // 10 minutes
}

fn default_sweep_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_token_ttl_hours() -> u64 {
    72
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            rate_limit: RateLimitConfig::default(),
            origin: OriginConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst_capacity: default_burst_capacity(),
            refill_per_sec: default_refill_per_sec(),
            idle_evict_secs: default_idle_evict_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_hours: default_token_ttl_hours(),
        }
    }
}

impl RateLimitConfig {
    /// Reject limits the bucket arithmetic cannot operate on. A zero,
    /// negative or non-finite refill rate would leave an exhausted bucket
    /// with no computable retry time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.refill_per_sec.is_finite() || self.refill_per_sec <= 0.0 {
            return Err(ConfigError::InvalidRefillRate(self.refill_per_sec));
        }
        Ok(())
    }

    /// Idle duration after which a client entry is eligible for eviction.
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_evict_secs)
    }

    /// Period of the background eviction sweep.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl AuthConfig {
    /// Lifetime of freshly minted tokens.
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_hours * 3600)
    }
}
