//! Tenant-aware JWT authentication for multi-tenant APIs.
//!
//! This crate turns an opaque bearer token into a verified, tenant-scoped
//! identity. It provides:
//!
//! - JWKS (JSON Web Key Set) fetching with a rotating snapshot cache
//! - Asymmetric signature validation (RSA, ECDSA, `EdDSA`)
//! - Registered-claim validation with clock-skew tolerance and a token
//!   lifetime ceiling
//! - Tenant identifier extraction from a configurable claim priority list
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │  Transport layer │────▶│  Authenticator   │────▶│ TenantExtractor  │
//! │  (HTTP, gRPC)    │     │  (pipeline)      │     │  (claim walk)    │
//! └──────────────────┘     └────────┬─────────┘     └──────────────────┘
//!                                   │
//!                          ┌────────▼─────────┐
//!                          │  JwksValidator   │
//!                          │  (signature +    │
//!                          │   claims)        │
//!                          └────────┬─────────┘
//!                                   │
//!                          ┌────────▼─────────┐
//!                          │    KeyCache      │
//!                          │  (snapshot +     │
//!                          │   background     │
//!                          │   refresh)       │
//!                          └────────┬─────────┘
//!                                   │ HTTPS
//!                          ┌────────▼─────────┐
//!                          │  Identity        │
//!                          │  provider JWKS   │
//!                          └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tenauth::{Authenticator, AuthConfig, KeyCache};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig {
//!     issuer_url: "https://auth.example.com".to_string(),
//!     audience_client_id: "my-api".to_string(),
//!     ..AuthConfig::default()
//! };
//!
//! let cache = Arc::new(KeyCache::new(config.clone()));
//! cache.start_background_refresh();
//!
//! let authenticator = Authenticator::new(config, Arc::clone(&cache));
//!
//! // In a request handler:
//! let identity = authenticator
//!     .authenticate("Bearer eyJhbGciOiJSUzI1NiIsImtpZCI6In...", None)
//!     .await?;
//!
//! println!("user: {}", identity.user_id);
//! println!("tenant: {}", identity.tenant_id);
//!
//! // At process shutdown:
//! cache.stop();
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod jwks;
pub mod jwt;
pub mod pipeline;
pub mod tenant;

pub use error::{AuthError, AuthErrorKind, Result};
pub use jwks::{KeyCache, KeySnapshot, SigningKey};
pub use jwt::{JwksValidator, TokenValidator, VerifiedClaims};
pub use pipeline::{Authenticator, Identity};
pub use tenant::TenantExtractor;

pub use tenauth_core::{TenantId, UserId};

#[cfg(any(test, feature = "test-utils"))]
pub use jwt::MockTokenValidator;

use std::time::Duration;

/// Configuration for the authentication core.
///
/// Loaded once at startup by the embedding process and immutable
/// afterwards; every component holds its own clone.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Expected `iss` claim value and base URL of the identity provider
    /// (e.g. `https://auth.example.com`).
    pub issuer_url: String,
    /// Expected member of the `aud` claim.
    pub audience_client_id: String,
    /// Claim names tried in order when extracting the tenant identifier.
    pub tenant_claim_priority: Vec<String>,
    /// Upper bound on `exp - iat`, in seconds (inclusive).
    pub max_token_lifetime_seconds: i64,
    /// Nominal key-set freshness window, in seconds.
    pub cache_ttl_seconds: u64,
    /// Fraction of the TTL at which the background refresh fires.
    pub refresh_threshold_fraction: f64,
    /// Symmetric leeway applied to `exp` and `iat` checks, in seconds.
    pub clock_skew_tolerance_seconds: i64,
    /// Maximum key-fetch attempts per refresh.
    pub retry_max_attempts: u32,
    /// Initial backoff between key-fetch attempts, in milliseconds;
    /// doubles after each failure.
    pub retry_initial_backoff_ms: u64,
}

impl AuthConfig {
    /// The issuer value tokens must carry, with any trailing slash removed.
    #[must_use]
    pub fn issuer(&self) -> &str {
        self.issuer_url.trim_end_matches('/')
    }

    /// The JWKS endpoint URL published by the identity provider.
    #[must_use]
    pub fn jwks_url(&self) -> String {
        format!("{}/.well-known/jwks.json", self.issuer())
    }

    /// Interval between scheduled background key refreshes
    /// (`cache_ttl_seconds * refresh_threshold_fraction`).
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        let secs = self.cache_ttl_seconds as f64 * self.refresh_threshold_fraction;
        Duration::from_secs_f64(secs.max(1.0))
    }

    /// Nominal key-set freshness window as a `Duration`.
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer_url: "https://auth.example.com".to_string(),
            audience_client_id: "tenauth-api".to_string(),
            tenant_claim_priority: vec![
                "tenant_id".to_string(),
                "organization_id".to_string(),
                "org_id".to_string(),
                // AWS Cognito custom attribute convention
                "custom:tenant_id".to_string(),
            ],
            max_token_lifetime_seconds: 3600,
            cache_ttl_seconds: 3600,
            refresh_threshold_fraction: 0.8,
            clock_skew_tolerance_seconds: 60,
            retry_max_attempts: 3,
            retry_initial_backoff_ms: 500,
        }
    }
}
