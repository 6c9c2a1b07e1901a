//! Identifier types for tenant-scoped authentication.
//!
//! Both identifiers validate their contents at construction so that no
//! unvalidated value can flow into downstream authorization or storage
//! layers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minimum accepted tenant identifier length.
pub const TENANT_ID_MIN_LEN: usize = 3;

/// Maximum accepted tenant identifier length.
pub const TENANT_ID_MAX_LEN: usize = 128;

/// A validated tenant identifier.
///
/// Tenant IDs come from identity-provider claims and name the multi-tenant
/// scope of a request. Accepted values match `[A-Za-z0-9_-]` and are between
/// 3 and 128 characters long (e.g. `org-123`, `tenant_abc`, `ORG-UUID-1234`).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parse and validate a tenant identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is empty, outside the allowed length
    /// bounds, or contains characters other than ASCII alphanumerics,
    /// hyphens, and underscores.
    pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();

        if value.is_empty() {
            return Err(IdError::Empty);
        }
        if value.len() < TENANT_ID_MIN_LEN {
            return Err(IdError::TooShort {
                min: TENANT_ID_MIN_LEN,
                got: value.len(),
            });
        }
        if value.len() > TENANT_ID_MAX_LEN {
            return Err(IdError::TooLong {
                max: TENANT_ID_MAX_LEN,
                got: value.len(),
            });
        }
        if let Some(c) = value
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
        {
            return Err(IdError::InvalidCharacter(c));
        }

        Ok(Self(value))
    }

    /// Return the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the identifier and return the underlying string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An opaque user identifier.
///
/// User IDs are taken verbatim from the `sub` claim of a verified token.
/// The issuer controls the format (a UUID for some providers, a
/// provider-prefixed string for others), so the only constraint enforced
/// here is non-emptiness.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create a `UserId` from a subject string.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is empty.
    pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        if value.is_empty() {
            return Err(IdError::Empty);
        }
        Ok(Self(value))
    }

    /// Return the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the identifier and return the underlying string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for UserId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input string is empty.
    #[error("identifier is empty")]
    Empty,

    /// The input is shorter than the minimum allowed length.
    #[error("identifier too short: minimum {min} characters, got {got}")]
    TooShort {
        /// The minimum number of characters.
        min: usize,
        /// The actual number of characters.
        got: usize,
    },

    /// The input is longer than the maximum allowed length.
    #[error("identifier too long: maximum {max} characters, got {got}")]
    TooLong {
        /// The maximum number of characters.
        max: usize,
        /// The actual number of characters.
        got: usize,
    },

    /// The input contains a character outside the allowed set.
    #[error("identifier contains invalid character: {0:?}")]
    InvalidCharacter(char),
}
