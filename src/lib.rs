// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Comment service admission gate
//!
//! Ingress-level request admission and authentication for the public
//! comment service:
//!
//! - Per-IP token bucket rate limiting (burst of 3, 1 token/second default)
//!   with background idle eviction
//! - Origin allow-list with exact and `*.wildcard` matching
//! - Stateless HS256 bearer token verification with distinct failure
//!   reasons and an explicit accepted-algorithm check
//!
//! Comment persistence and user storage stay behind the
//! [`directory::UserDirectory`] seam.

pub mod auth;
pub mod config;
pub mod directory;
pub mod handlers;
pub mod limiter;
pub mod origin;

pub use auth::{AuthError, Claims, TokenAuthenticator};
pub use config::Config;
pub use directory::{MemoryDirectory, User, UserDirectory};
pub use handlers::{router, AppState, CurrentUser};
pub use limiter::{ClientRegistry, RateLimitResult};
pub use origin::{OriginError, OriginPolicy};
