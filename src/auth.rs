// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Stateless bearer token verification.
//!
//! Tokens are HMAC-signed claims carrying the subject's user id and the
//! usual time bounds. Verification is a single pass with distinct terminal
//! states so clients get an actionable reason: missing credentials,
//! malformed token, bad signature, out-of-window, or unknown subject.
//!
//! Only the HS256 family is accepted. The algorithm named in the token
//! header is matched against a closed set *before* any cryptographic work,
//! so a token claiming `none` or an asymmetric scheme is rejected outright
//! rather than reinterpreted against the symmetric secret.

use crate::directory::{User, UserDirectory};
use jsonwebtoken::{
    decode, decode_header, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey,
    Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Signature algorithms this service accepts. Symmetric HMAC only.
const ACCEPTED_ALGORITHMS: &[Algorithm] = &[Algorithm::HS256];

/// Scheme prefix of the credential header.
const BEARER_PREFIX: &str = "Bearer ";

/// Terminal states of a failed verification pass.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credentials provided")]
    MissingCredentials,

    #[error("malformed token")]
    Malformed,

    #[error("invalid token signature")]
    BadSignature,

    #[error("token expired or not yet valid")]
    ExpiredOrPremature,

    #[error("unknown user")]
    UnknownSubject,

    #[error("failed to record last login")]
    LastSeenWriteFailed,

    #[error("failed to sign token")]
    TokenSigning,
}

/// Token claims: the subject plus issue/activation/expiry times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Verifies and mints bearer tokens against the process-wide secret.
pub struct TokenAuthenticator {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
    token_ttl: Duration,
}

impl TokenAuthenticator {
    pub fn new(secret: &[u8], token_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = 0;

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            encoding_key: EncodingKey::from_secret(secret),
            validation,
            token_ttl,
        }
    }

    /// Mint a token for `user_id`, valid from now until now + TTL.
    pub fn issue(&self, user_id: u64) -> Result<String, AuthError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            user_id,
            iat: now,
            nbf: now,
            exp: now + self.token_ttl.as_secs() as i64,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|_| AuthError::TokenSigning)
    }

    /// Verify a raw token string (no scheme prefix) and return its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        // Algorithm check first, against the closed accepted set.
        let header = decode_header(token).map_err(|_| AuthError::Malformed)?;
        if !ACCEPTED_ALGORITHMS.contains(&header.alg) {
            debug!(alg = ?header.alg, "rejected token with unaccepted algorithm");
            return Err(AuthError::BadSignature);
        }

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(
            |err| match err.kind() {
                ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => {
                    AuthError::ExpiredOrPremature
                }
                ErrorKind::InvalidSignature => AuthError::BadSignature,
                _ => AuthError::Malformed,
            },
        )?;
        Ok(data.claims)
    }

    /// Full verification pass for a request's `Authorization` header value.
    ///
    /// On success the subject is resolved through the directory and its
    /// last-authenticated marker is updated; a failed update fails the
    /// whole attempt, so an admitted principal always has a persisted
    /// activity record.
    pub async fn authenticate(
        &self,
        auth_header: Option<&str>,
        directory: &dyn UserDirectory,
    ) -> Result<User, AuthError> {
        let header = auth_header.ok_or(AuthError::MissingCredentials)?;
        let token = header
            .strip_prefix(BEARER_PREFIX)
            .ok_or(AuthError::MissingCredentials)?;
        if token.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let claims = self.verify(token)?;

        let user = directory
            .lookup_user_by_id(claims.user_id)
            .await
            .ok_or(AuthError::UnknownSubject)?;

        directory
            .update_last_authenticated(&user)
            .await
            .map_err(|_| AuthError::LastSeenWriteFailed)?;

        debug!(user_id = user.id, "authenticated");
        Ok(user)
    }
}
