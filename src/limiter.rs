// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Per-IP token bucket rate limiting with idle eviction.
//!
//! Each client IP owns an independent bucket (default: burst of 3, refilled
//! at 1 token/second). State lives in a sharded concurrent map so unrelated
//! clients never contend on a common lock, and a background sweep drops
//! entries not seen for the idle threshold. An evicted client that returns
//! simply gets a fresh bucket.

use crate::config::RateLimitConfig;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of a rate limit check.
#[derive(Debug, Clone)]
pub enum RateLimitResult {
    /// Request is admitted
    Allowed {
        /// Whole tokens left in the bucket
        remaining: u32,
    },
    /// Request is denied
    Limited {
        /// Time until the next token becomes available
        retry_after: Duration,
    },
}

/// Token bucket for a single client.
#[derive(Debug)]
struct TokenBucket {
    /// Available tokens, always within `0.0..=capacity`
    tokens: f64,
    /// Maximum tokens (burst size)
    capacity: f64,
    /// Token refill rate per second
    refill_per_sec: f64,
    /// Last time tokens were refilled
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity);
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    /// Refill tokens based on elapsed time, capped at capacity.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Try to consume a token. Returns true if successful.
    fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn remaining(&self) -> u32 {
        self.tokens.floor() as u32
    }

    fn time_until_available(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let needed = 1.0 - self.tokens;
        let wait = needed / self.refill_per_sec;
        // A non-positive or non-finite rate has no computable retry time;
        // such configs are rejected at startup, but a hand-built registry
        // must still deny instead of panicking in Duration::from_secs_f64.
        if wait.is_finite() && wait >= 0.0 {
            Duration::from_secs_f64(wait)
        } else {
            Duration::ZERO
        }
    }
}

/// Per-client state: the bucket plus the last time the client was seen.
#[derive(Debug)]
struct ClientEntry {
    bucket: TokenBucket,
    last_seen: Instant,
}

impl ClientEntry {
    fn new(config: &RateLimitConfig) -> Self {
        Self {
            bucket: TokenBucket::new(config.burst_capacity, config.refill_per_sec),
            last_seen: Instant::now(),
        }
    }
}

/// Concurrent registry of per-IP rate limit state.
///
/// Cheap to clone; clones share the underlying map, so the background
/// sweeper and the request path operate on the same state.
#[derive(Clone)]
pub struct ClientRegistry {
    config: RateLimitConfig,
    clients: Arc<DashMap<IpAddr, ClientEntry>>,
}

impl ClientRegistry {
    /// Create an empty registry with the given limits.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            clients: Arc::new(DashMap::new()),
        }
    }

    /// Check whether a request from `ip` is admitted.
    ///
    /// Get-or-create, refill, consume and the last-seen touch all happen
    /// under the entry's shard guard, so concurrent requests from the same
    /// IP observe a consistent token count and never create duplicate
    /// entries.
    pub fn check(&self, ip: IpAddr) -> RateLimitResult {
        let mut entry = self
            .clients
            .entry(ip)
            .or_insert_with(|| ClientEntry::new(&self.config));
        entry.last_seen = Instant::now();

        if entry.bucket.try_consume() {
            RateLimitResult::Allowed {
                remaining: entry.bucket.remaining(),
            }
        } else {
            let retry_after = entry.bucket.time_until_available();
            debug!(%ip, ?retry_after, "rate limit exceeded");
            RateLimitResult::Limited { retry_after }
        }
    }

    /// Remove every entry whose `last_seen` is older than `idle_threshold`.
    ///
    /// The comparison happens per entry at deletion time, under the same
    /// shard lock `check` takes, so an entry touched while the sweep is in
    /// flight survives it. Returns the number of evicted entries.
    pub fn evict_idle(&self, idle_threshold: Duration) -> usize {
        let before = self.clients.len();
        let now = Instant::now();
        self.clients
            .retain(|_, entry| now.duration_since(entry.last_seen) <= idle_threshold);
        before.saturating_sub(self.clients.len())
    }

    /// Number of tracked clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// True if no clients are tracked.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    #[cfg(test)]
    fn backdate(&self, ip: IpAddr, by: Duration) {
        let mut entry = self.clients.get_mut(&ip).unwrap();
        entry.last_seen -= by;
        entry.bucket.last_refill -= by;
    }
}
