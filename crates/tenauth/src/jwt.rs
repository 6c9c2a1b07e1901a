//! Token validation and claims extraction.
//!
//! [`JwksValidator`] decides whether a token is authentic and currently
//! usable: it verifies the signature against the key cache, then checks the
//! registered claims (issuer, audience, timing, lifetime) against
//! configuration. [`VerifiedClaims`] is only ever constructed after
//! signature verification succeeds.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{AuthError, Result};
use crate::jwks::KeyCache;
use crate::AuthConfig;

/// Signature algorithms accepted from untrusted token headers.
///
/// Only asymmetric algorithms appear here; `none` and HMAC algorithms from
/// an untrusted header are rejected as malformed.
pub const ALLOWED_ALGORITHMS: [Algorithm; 6] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Claims extracted from a token after successful signature verification.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedClaims {
    /// The `sub` claim.
    pub subject: String,
    /// The `iss` claim.
    pub issuer: String,
    /// The `aud` claim, normalized to a list.
    pub audience: Vec<String>,
    /// The `iat` claim.
    pub issued_at: DateTime<Utc>,
    /// The `exp` claim.
    pub expires_at: DateTime<Utc>,
    /// The full decoded claim set, in token order.
    pub raw: Map<String, Value>,
}

impl VerifiedClaims {
    /// Look up a claim by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.raw.get(name)
    }

    /// Look up a string-valued claim by name.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.raw.get(name).and_then(Value::as_str)
    }
}

/// Trait for validating bearer tokens.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate a token and extract its claims.
    ///
    /// The optional deadline is honored only by network-bound key fetches;
    /// all other validation work is in-memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, its signature does not
    /// verify, or its claims fail validation.
    async fn validate(
        &self,
        token: &str,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<VerifiedClaims>;
}

/// Audience claim that can be either a string or an array of strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(untagged)]
enum Audience {
    Single(String),
    Multiple(Vec<String>),
    #[default]
    None,
}

impl Audience {
    fn contains(&self, value: &str) -> bool {
        match self {
            Self::Single(s) => s == value,
            Self::Multiple(v) => v.iter().any(|s| s == value),
            Self::None => false,
        }
    }

    fn into_vec(self) -> Vec<String> {
        match self {
            Self::Single(s) => vec![s],
            Self::Multiple(v) => v,
            Self::None => Vec::new(),
        }
    }
}

/// JWKS-backed token validator.
pub struct JwksValidator {
    config: AuthConfig,
    cache: Arc<KeyCache>,
}

impl JwksValidator {
    /// Create a validator backed by the given key cache.
    #[must_use]
    pub const fn new(config: AuthConfig, cache: Arc<KeyCache>) -> Self {
        Self { config, cache }
    }

    /// The key cache this validator consults.
    #[must_use]
    pub const fn key_cache(&self) -> &Arc<KeyCache> {
        &self.cache
    }
}

#[async_trait]
impl TokenValidator for JwksValidator {
    async fn validate(
        &self,
        token: &str,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<VerifiedClaims> {
        // The header is read untrusted, only to pick which key to try.
        let header =
            decode_header(token).map_err(|e| AuthError::TokenMalformed(e.to_string()))?;

        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            return Err(AuthError::TokenMalformed(format!(
                "disallowed algorithm: {:?}",
                header.alg
            )));
        }

        let kid = header
            .kid
            .ok_or_else(|| AuthError::TokenMalformed("missing kid in header".to_string()))?;

        // A key that stays unknown after the cache's forced refresh means
        // the signature cannot be verified.
        let key = self.cache.get(&kid, deadline).await.map_err(|err| match err {
            AuthError::KeyNotFound(kid) => {
                tracing::warn!(kid, "signing key unknown after forced refresh");
                AuthError::TokenSignature
            }
            other => other,
        })?;

        // Registered claims are checked manually below so that skew and
        // lifetime semantics stay in one place; the library only verifies
        // the signature here.
        let mut validation = Validation::new(key.algorithm());
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let data = decode::<Map<String, Value>>(token, key.decoding_key(), &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm | ErrorKind::Crypto(_) => {
                    AuthError::TokenSignature
                }
                _ => AuthError::TokenMalformed(e.to_string()),
            })?;

        let claims =
            check_registered_claims(&data.claims, &self.config, Utc::now().timestamp())?;

        tracing::debug!(sub = %claims.subject, "token validated");
        Ok(claims)
    }
}

/// Validate registered claims against configuration.
///
/// Pure in `(claims, config, now)`: identical inputs always produce
/// identical output. Clock-skew tolerance is applied symmetrically to `exp`
/// and `iat`; the lifetime ceiling is enforced independently of expiry, so
/// an unexpired token issued with too long a lifetime is still rejected.
fn check_registered_claims(
    raw: &Map<String, Value>,
    config: &AuthConfig,
    now: i64,
) -> Result<VerifiedClaims> {
    let issuer = raw
        .get("iss")
        .and_then(Value::as_str)
        .ok_or_else(|| AuthError::TokenInvalidClaim("missing iss claim".to_string()))?;
    if issuer != config.issuer() {
        return Err(AuthError::TokenInvalidClaim("issuer mismatch".to_string()));
    }

    let audience: Audience = match raw.get("aud") {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|_| AuthError::TokenInvalidClaim("malformed aud claim".to_string()))?,
        None => Audience::None,
    };
    if !audience.contains(&config.audience_client_id) {
        return Err(AuthError::TokenInvalidClaim(
            "audience mismatch".to_string(),
        ));
    }

    let issued_at = claim_timestamp(raw, "iat")?;
    let expires_at = claim_timestamp(raw, "exp")?;
    let skew = config.clock_skew_tolerance_seconds;

    if expires_at <= now - skew {
        return Err(AuthError::TokenExpired);
    }
    if issued_at > now + skew {
        return Err(AuthError::TokenInvalidClaim(
            "token issued in the future".to_string(),
        ));
    }
    if expires_at - issued_at > config.max_token_lifetime_seconds {
        return Err(AuthError::TokenLifetimeExceeded);
    }

    let subject = raw
        .get("sub")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthError::TokenInvalidClaim("missing sub claim".to_string()))?;

    Ok(VerifiedClaims {
        subject: subject.to_string(),
        issuer: issuer.to_string(),
        audience: audience.into_vec(),
        issued_at: datetime_from_timestamp(issued_at)?,
        expires_at: datetime_from_timestamp(expires_at)?,
        raw: raw.clone(),
    })
}

/// Read a NumericDate claim. Fractional seconds are allowed and truncated
/// toward zero.
#[allow(clippy::cast_possible_truncation)]
fn claim_timestamp(raw: &Map<String, Value>, name: &str) -> Result<i64> {
    raw.get(name)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f.trunc() as i64)))
        .ok_or_else(|| {
            AuthError::TokenInvalidClaim(format!("missing or non-numeric {name} claim"))
        })
}

fn datetime_from_timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| AuthError::TokenInvalidClaim("timestamp out of range".to_string()))
}

/// A mock token validator for testing and dev mode.
///
/// Accepts tokens in the format `test-token:<sub>:<tenant>` and synthesizes
/// a claim set from them; no cryptography involved.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct MockTokenValidator;

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl TokenValidator for MockTokenValidator {
    async fn validate(
        &self,
        token: &str,
        _deadline: Option<tokio::time::Instant>,
    ) -> Result<VerifiedClaims> {
        let rest = token.strip_prefix("test-token:").ok_or_else(|| {
            AuthError::TokenMalformed("expected test-token:<sub>:<tenant>".to_string())
        })?;

        let mut parts = rest.splitn(2, ':');
        let (Some(sub), Some(tenant)) = (parts.next(), parts.next()) else {
            return Err(AuthError::TokenMalformed(
                "expected test-token:<sub>:<tenant>".to_string(),
            ));
        };
        if sub.is_empty() {
            return Err(AuthError::TokenInvalidClaim(
                "missing sub claim".to_string(),
            ));
        }

        let now = Utc::now().timestamp();
        let exp = now + 3600;

        let mut raw = Map::new();
        raw.insert("sub".to_string(), Value::String(sub.to_string()));
        raw.insert("tenant_id".to_string(), Value::String(tenant.to_string()));
        raw.insert("iat".to_string(), Value::from(now));
        raw.insert("exp".to_string(), Value::from(exp));

        Ok(VerifiedClaims {
            subject: sub.to_string(),
            issuer: "test-issuer".to_string(),
            audience: Vec::new(),
            issued_at: datetime_from_timestamp(now)?,
            expires_at: datetime_from_timestamp(exp)?,
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config() -> AuthConfig {
        AuthConfig {
            issuer_url: "https://auth.example.com".to_string(),
            audience_client_id: "test-api".to_string(),
            ..AuthConfig::default()
        }
    }

    fn claims_map(entries: Value) -> Map<String, Value> {
        entries.as_object().cloned().unwrap()
    }

    fn valid_claims(now: i64) -> Map<String, Value> {
        claims_map(json!({
            "iss": "https://auth.example.com",
            "aud": "test-api",
            "sub": "user-1",
            "iat": now - 10,
            "exp": now + 600,
            "tenant_id": "org-1",
        }))
    }

    #[test]
    fn allow_list_excludes_symmetric_algorithms() {
        assert!(!ALLOWED_ALGORITHMS.contains(&Algorithm::HS256));
        assert!(!ALLOWED_ALGORITHMS.contains(&Algorithm::HS384));
        assert!(!ALLOWED_ALGORITHMS.contains(&Algorithm::HS512));
        assert!(ALLOWED_ALGORITHMS.contains(&Algorithm::RS256));
        assert!(ALLOWED_ALGORITHMS.contains(&Algorithm::EdDSA));
    }

    #[test]
    fn audience_matching() {
        assert!(Audience::Single("api".to_string()).contains("api"));
        assert!(!Audience::Single("other".to_string()).contains("api"));
        assert!(
            Audience::Multiple(vec!["a".to_string(), "api".to_string()]).contains("api")
        );
        assert!(!Audience::None.contains("api"));
    }

    #[test]
    fn valid_claims_pass() {
        let now = 1_700_000_000;
        let claims = check_registered_claims(&valid_claims(now), &test_config(), now).unwrap();
        assert_eq!(claims.subject, "user-1");
        assert_eq!(claims.issuer, "https://auth.example.com");
        assert_eq!(claims.audience, vec!["test-api"]);
        assert_eq!(claims.expires_at.timestamp(), now + 600);
        assert_eq!(claims.get_str("tenant_id"), Some("org-1"));
    }

    #[test]
    fn validation_is_deterministic() {
        let now = 1_700_000_000;
        let raw = valid_claims(now);
        let first = check_registered_claims(&raw, &test_config(), now).unwrap();
        let second = check_registered_claims(&raw, &test_config(), now).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn audience_array_accepted() {
        let now = 1_700_000_000;
        let mut raw = valid_claims(now);
        raw.insert("aud".to_string(), json!(["other-api", "test-api"]));
        let claims = check_registered_claims(&raw, &test_config(), now).unwrap();
        assert_eq!(claims.audience, vec!["other-api", "test-api"]);
    }

    #[test]
    fn issuer_mismatch_rejected() {
        let now = 1_700_000_000;
        let mut raw = valid_claims(now);
        raw.insert("iss".to_string(), json!("https://evil.example.com"));
        let err = check_registered_claims(&raw, &test_config(), now).unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalidClaim(_)));
    }

    #[test]
    fn audience_mismatch_rejected() {
        let now = 1_700_000_000;
        let mut raw = valid_claims(now);
        raw.insert("aud".to_string(), json!("someone-else"));
        let err = check_registered_claims(&raw, &test_config(), now).unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalidClaim(_)));
    }

    #[test]
    fn expired_beyond_skew_rejected() {
        let now = 1_700_000_000;
        let mut raw = valid_claims(now);
        raw.insert("iat".to_string(), json!(now - 600));
        raw.insert("exp".to_string(), json!(now - 61));
        let err = check_registered_claims(&raw, &test_config(), now).unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[test]
    fn expired_within_skew_accepted() {
        let now = 1_700_000_000;
        let mut raw = valid_claims(now);
        raw.insert("iat".to_string(), json!(now - 600));
        raw.insert("exp".to_string(), json!(now - 30));
        assert!(check_registered_claims(&raw, &test_config(), now).is_ok());
    }

    #[test]
    fn future_iat_beyond_skew_rejected() {
        let now = 1_700_000_000;
        let mut raw = valid_claims(now);
        raw.insert("iat".to_string(), json!(now + 120));
        raw.insert("exp".to_string(), json!(now + 720));
        let err = check_registered_claims(&raw, &test_config(), now).unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalidClaim(_)));
    }

    #[test]
    fn future_iat_within_skew_accepted() {
        let now = 1_700_000_000;
        let mut raw = valid_claims(now);
        raw.insert("iat".to_string(), json!(now + 30));
        raw.insert("exp".to_string(), json!(now + 630));
        assert!(check_registered_claims(&raw, &test_config(), now).is_ok());
    }

    #[test]
    fn lifetime_at_limit_accepted() {
        // iat=1000, exp=4600: exactly 3600 seconds.
        let mut raw = valid_claims(2000);
        raw.insert("iat".to_string(), json!(1000));
        raw.insert("exp".to_string(), json!(4600));
        assert!(check_registered_claims(&raw, &test_config(), 2000).is_ok());
    }

    #[test]
    fn lifetime_over_limit_rejected() {
        // iat=1000, exp=4700: 3700 seconds, over the 3600 ceiling, even
        // though the token has not expired yet.
        let mut raw = valid_claims(2000);
        raw.insert("iat".to_string(), json!(1000));
        raw.insert("exp".to_string(), json!(4700));
        let err = check_registered_claims(&raw, &test_config(), 2000).unwrap_err();
        assert!(matches!(err, AuthError::TokenLifetimeExceeded));
    }

    #[test]
    fn missing_sub_rejected() {
        let now = 1_700_000_000;
        let mut raw = valid_claims(now);
        raw.remove("sub");
        let err = check_registered_claims(&raw, &test_config(), now).unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalidClaim(_)));
    }

    #[test]
    fn fractional_timestamps_truncated() {
        // NumericDate permits fractional seconds; some issuers emit them.
        let now = 1_700_000_000;
        let mut raw = valid_claims(now);
        raw.insert("iat".to_string(), json!(1_699_999_990.75));
        raw.insert("exp".to_string(), json!(1_700_000_600.25));
        let claims = check_registered_claims(&raw, &test_config(), now).unwrap();
        assert_eq!(claims.issued_at.timestamp(), now - 10);
        assert_eq!(claims.expires_at.timestamp(), now + 600);
    }

    #[test]
    fn non_numeric_exp_rejected() {
        let now = 1_700_000_000;
        let mut raw = valid_claims(now);
        raw.insert("exp".to_string(), json!("soon"));
        let err = check_registered_claims(&raw, &test_config(), now).unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalidClaim(_)));
    }

    #[test]
    fn missing_iat_rejected() {
        let now = 1_700_000_000;
        let mut raw = valid_claims(now);
        raw.remove("iat");
        let err = check_registered_claims(&raw, &test_config(), now).unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalidClaim(_)));
    }

    #[test]
    fn raw_claim_order_preserved() {
        let now = 1_700_000_000;
        let claims = check_registered_claims(&valid_claims(now), &test_config(), now).unwrap();
        let names: Vec<&str> = claims.raw.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["iss", "aud", "sub", "iat", "exp", "tenant_id"]);
    }

    #[tokio::test]
    async fn disallowed_algorithm_rejected_before_key_lookup() {
        use jsonwebtoken::{encode, EncodingKey, Header};

        // An HMAC token never reaches the key cache; the cache here points
        // at a dead address and would fail loudly if consulted.
        let config = AuthConfig {
            issuer_url: "http://127.0.0.1:1".to_string(),
            retry_max_attempts: 1,
            retry_initial_backoff_ms: 1,
            ..test_config()
        };
        let cache = Arc::new(KeyCache::new(config.clone()));
        let validator = JwksValidator::new(config, cache);

        let token = encode(
            &Header::new(Algorithm::HS256),
            &json!({"sub": "user-1"}),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        let err = validator.validate(&token, None).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenMalformed(_)));
    }

    #[tokio::test]
    async fn garbage_token_is_malformed() {
        let config = test_config();
        let cache = Arc::new(KeyCache::new(config.clone()));
        let validator = JwksValidator::new(config, cache);

        let err = validator.validate("not-a-jwt", None).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenMalformed(_)));
    }

    #[tokio::test]
    async fn mock_validator_accepts_test_tokens() {
        let validator = MockTokenValidator;
        let claims = validator
            .validate("test-token:user-1:org-1", None)
            .await
            .unwrap();
        assert_eq!(claims.subject, "user-1");
        assert_eq!(claims.get_str("tenant_id"), Some("org-1"));
    }

    #[tokio::test]
    async fn mock_validator_rejects_other_tokens() {
        let validator = MockTokenValidator;
        let result = validator.validate("some-random-token", None).await;
        assert!(matches!(result, Err(AuthError::TokenMalformed(_))));
    }
}
