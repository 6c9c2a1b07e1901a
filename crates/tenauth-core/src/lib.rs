//! Core types for tenauth.
//!
//! This crate provides the strongly-typed identifiers shared across the
//! tenauth authentication core:
//!
//! - **`TenantId`**: a validated multi-tenant scope identifier
//! - **`UserId`**: an opaque subject identifier taken from a verified token
//!
//! # Example
//!
//! ```
//! use tenauth_core::{TenantId, UserId};
//!
//! let tenant: TenantId = "org-123".parse().unwrap();
//! assert_eq!(tenant.as_str(), "org-123");
//!
//! // Whitespace and other characters outside [A-Za-z0-9_-] are rejected.
//! assert!("org 123".parse::<TenantId>().is_err());
//!
//! let user = UserId::new("auth0|someone").unwrap();
//! assert_eq!(user.as_str(), "auth0|someone");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ids;

pub use ids::{IdError, TenantId, UserId};
