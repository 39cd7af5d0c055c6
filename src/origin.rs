// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Request origin allow-list.
//!
//! The declared `Origin` header is preferred; `Referer` is the fallback.
//! A request with neither, or with a source that does not parse as a URL,
//! is denied outright. Matching is case-sensitive exact equality on the
//! hostname or host:port, plus suffix matching for `*.domain` patterns.

use thiserror::Error;
use tracing::debug;
use url::Url;

/// Why a request source was rejected.
#[derive(Debug, Error, Clone)]
pub enum OriginError {
    #[error("request source could not be determined")]
    MissingSource,

    #[error("request source is not a valid URL: {0}")]
    UnverifiableSource(String),

    #[error("request source {0} is not a trusted origin")]
    UntrustedSource(String),
}

/// One allow-list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AllowedOrigin {
    /// Matches the hostname or host:port exactly
    Exact(String),
    /// `*.suffix` pattern; matches any hostname ending in `suffix`
    WildcardSuffix(String),
}

/// Compiled origin allow-list.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    entries: Vec<AllowedOrigin>,
}

impl OriginPolicy {
    /// Build a policy from host patterns.
    ///
    /// Blank patterns are ignored; an effectively empty list is a
    /// configuration error, never an allow-all.
    pub fn from_patterns<S: AsRef<str>>(
        patterns: &[S],
    ) -> Result<Self, crate::config::ConfigError> {
        let entries: Vec<AllowedOrigin> = patterns
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .map(|p| match p.strip_prefix("*.") {
                Some(suffix) => AllowedOrigin::WildcardSuffix(suffix.to_string()),
                None => AllowedOrigin::Exact(p.to_string()),
            })
            .collect();

        if entries.is_empty() {
            return Err(crate::config::ConfigError::EmptyAllowList);
        }
        Ok(Self { entries })
    }

    /// Check a request's declared source against the allow-list.
    pub fn check(
        &self,
        origin: Option<&str>,
        referer: Option<&str>,
    ) -> Result<(), OriginError> {
        let source = origin
            .filter(|s| !s.is_empty())
            .or_else(|| referer.filter(|s| !s.is_empty()))
            .ok_or(OriginError::MissingSource)?;

        let url = Url::parse(source)
            .map_err(|_| OriginError::UnverifiableSource(source.to_string()))?;
        let hostname = url
            .host_str()
            .ok_or_else(|| OriginError::UnverifiableSource(source.to_string()))?;
        let host_port = match url.port() {
            Some(port) => format!("{hostname}:{port}"),
            None => hostname.to_string(),
        };

        for entry in &self.entries {
            match entry {
                AllowedOrigin::Exact(host) => {
                    if host == hostname || *host == host_port {
                        debug!(source = %source, matched = %host, "origin allowed");
                        return Ok(());
                    }
                }
                AllowedOrigin::WildcardSuffix(suffix) => {
                    if hostname.ends_with(suffix.as_str()) {
                        debug!(source = %source, suffix = %suffix, "origin allowed by wildcard");
                        return Ok(());
                    }
                }
            }
        }

        debug!(source = %source, "origin denied");
        Err(OriginError::UntrustedSource(hostname.to_string()))
    }
}
