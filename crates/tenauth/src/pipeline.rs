//! The composed authentication pipeline.
//!
//! [`Authenticator`] is the single entry point the transport layer calls:
//! it strips the bearer prefix, drives the token validator, then the tenant
//! extractor, and assembles the resulting [`Identity`]. The pipeline is
//! linear; nothing below it is retried except the key cache's own fetch.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use tenauth_core::{TenantId, UserId};

use crate::error::{AuthError, Result};
use crate::jwks::KeyCache;
use crate::jwt::{JwksValidator, TokenValidator, VerifiedClaims};
use crate::tenant::TenantExtractor;
use crate::AuthConfig;

/// A verified, tenant-scoped identity.
///
/// Created fresh per authentication call and owned by the request scope;
/// `expires_at` always equals the token's own expiry and must not be
/// extended by callers.
#[derive(Debug, Clone)]
pub struct Identity {
    /// The authenticated user (the token's `sub` claim).
    pub user_id: UserId,
    /// The tenant scope the request runs under.
    pub tenant_id: TenantId,
    /// When the presented token expires.
    pub expires_at: DateTime<Utc>,
    /// The full verified claim set for downstream consumers.
    pub claims: VerifiedClaims,
}

/// The authentication pipeline: bearer value in, identity or classified
/// error out.
pub struct Authenticator<V = JwksValidator> {
    validator: V,
    extractor: TenantExtractor,
}

impl Authenticator<JwksValidator> {
    /// Create a pipeline backed by a JWKS validator on the given key cache.
    #[must_use]
    pub fn new(config: AuthConfig, cache: Arc<KeyCache>) -> Self {
        let extractor = TenantExtractor::from_config(&config);
        let validator = JwksValidator::new(config, cache);
        Self {
            validator,
            extractor,
        }
    }
}

impl<V: TokenValidator> Authenticator<V> {
    /// Create a pipeline from an explicit validator and extractor.
    pub const fn with_validator(validator: V, extractor: TenantExtractor) -> Self {
        Self {
            validator,
            extractor,
        }
    }

    /// Authenticate a raw `Authorization` header value.
    ///
    /// The optional deadline is honored only by the network-bound key
    /// refresh path inside validation; everything else is in-memory.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] whose [`kind`](AuthError::kind) classifies
    /// the failure for the transport layer.
    pub async fn authenticate(
        &self,
        bearer_value: &str,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<Identity> {
        let token = bearer_value.strip_prefix("Bearer ").ok_or_else(|| {
            AuthError::TokenMalformed("authorization value must be 'Bearer <token>'".to_string())
        })?;
        if token.is_empty() {
            return Err(AuthError::TokenMalformed("empty bearer token".to_string()));
        }

        let claims = self.validator.validate(token, deadline).await?;
        let tenant_id = self.extractor.extract(&claims)?;
        let user_id = UserId::new(claims.subject.clone())
            .map_err(|_| AuthError::TokenInvalidClaim("missing sub claim".to_string()))?;

        tracing::debug!(user = %user_id, tenant = %tenant_id, "authenticated");

        Ok(Identity {
            user_id,
            tenant_id,
            expires_at: claims.expires_at,
            claims,
        })
    }
}
