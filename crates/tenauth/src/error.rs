//! Authentication error types.
//!
//! Every failure in the authentication core is a value of the closed
//! [`AuthError`] enum. The transport layer consuming this crate only sees
//! the error [`kind`](AuthError::kind) and a sanitized message; key
//! material, raw token bytes, and identity-provider response bodies never
//! appear in error text.

use thiserror::Error;

/// A result type using `AuthError`.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur during authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The key set could not be fetched from the identity provider.
    #[error("key set fetch failed: {0}")]
    KeyFetch(String),

    /// The key ID referenced by a token is absent even after a forced
    /// refresh of the key set.
    #[error("signing key not found: {0}")]
    KeyNotFound(String),

    /// The token structure is unparsable or uses a disallowed algorithm.
    #[error("malformed token: {0}")]
    TokenMalformed(String),

    /// Cryptographic signature verification failed.
    #[error("token signature verification failed")]
    TokenSignature,

    /// The token expired beyond the configured clock-skew tolerance.
    #[error("token expired")]
    TokenExpired,

    /// The token's `exp - iat` span exceeds the configured maximum.
    #[error("token lifetime exceeds the configured maximum")]
    TokenLifetimeExceeded,

    /// A registered claim (issuer, audience, `iat`) failed validation.
    #[error("invalid token claim: {0}")]
    TokenInvalidClaim(String),

    /// None of the configured tenant claim names is present in the token.
    #[error("no tenant claim found in token")]
    MissingTenantClaim,

    /// The tenant claim is present but its value fails format validation.
    #[error("invalid tenant identifier: {0}")]
    InvalidTenantFormat(#[from] tenauth_core::IdError),
}

/// Stable classification of an authentication failure.
///
/// The transport layer maps these to its own responses (HTTP status codes,
/// gRPC codes, and so on); the core only decides the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// The caller did not present a valid token.
    Unauthenticated,
    /// The token is valid but carries no usable tenant scope.
    Forbidden,
    /// The core itself could not reach a decision (e.g. cold-start key
    /// fetch failure).
    Internal,
}

impl AuthError {
    /// Classify this error for the transport boundary.
    #[must_use]
    pub const fn kind(&self) -> AuthErrorKind {
        match self {
            Self::KeyNotFound(_)
            | Self::TokenMalformed(_)
            | Self::TokenSignature
            | Self::TokenExpired
            | Self::TokenLifetimeExceeded
            | Self::TokenInvalidClaim(_) => AuthErrorKind::Unauthenticated,
            Self::MissingTenantClaim | Self::InvalidTenantFormat(_) => AuthErrorKind::Forbidden,
            Self::KeyFetch(_) => AuthErrorKind::Internal,
        }
    }

    /// Returns the conventional HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self.kind() {
            AuthErrorKind::Unauthenticated => 401,
            AuthErrorKind::Forbidden => 403,
            AuthErrorKind::Internal => 500,
        }
    }

    /// Returns `true` if a retry of the same request could succeed.
    ///
    /// Only key-set fetch failures are transient; every token-level
    /// rejection is final for the presented token.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::KeyFetch(_))
    }
}
