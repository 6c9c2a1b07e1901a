//! Tenant identifier extraction from verified claims.
//!
//! Different identity providers surface tenant context under different
//! claim names (a vendor-prefixed custom attribute on one, a plain
//! `organization_id` on another). An ordered priority list lets one
//! deployment support several claim conventions without per-provider
//! branching.

use tenauth_core::TenantId;

use crate::error::{AuthError, Result};
use crate::jwt::VerifiedClaims;
use crate::AuthConfig;

/// Extracts one canonical tenant identifier from verified claims.
#[derive(Debug, Clone)]
pub struct TenantExtractor {
    claim_names: Vec<String>,
}

impl TenantExtractor {
    /// Create an extractor with an ordered list of claim names to try.
    #[must_use]
    pub const fn new(claim_names: Vec<String>) -> Self {
        Self { claim_names }
    }

    /// Create an extractor from the configured claim priority list.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.tenant_claim_priority.clone())
    }

    /// The claim names this extractor checks, in priority order.
    #[must_use]
    pub fn claim_names(&self) -> &[String] {
        &self.claim_names
    }

    /// Derive the tenant identifier from verified claims.
    ///
    /// Walks the priority list and picks the first claim present with a
    /// non-empty string value; claims holding other value types are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns `MissingTenantClaim` if none of the configured names
    /// yields a value, and `InvalidTenantFormat` if the chosen value fails
    /// charset or length validation.
    pub fn extract(&self, claims: &VerifiedClaims) -> Result<TenantId> {
        for name in &self.claim_names {
            let Some(value) = claims.get(name) else {
                continue;
            };
            let Some(value) = value.as_str() else {
                tracing::debug!(claim = %name, "tenant claim is not a string, skipping");
                continue;
            };
            if value.is_empty() {
                continue;
            }

            tracing::debug!(claim = %name, "tenant claim selected");
            return TenantId::new(value).map_err(AuthError::from);
        }

        tracing::warn!(
            checked = ?self.claim_names,
            "no tenant claim found in verified token"
        );
        Err(AuthError::MissingTenantClaim)
    }
}
