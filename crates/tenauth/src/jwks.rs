//! JWKS (JSON Web Key Set) fetching and snapshot caching.
//!
//! The [`KeyCache`] keeps one immutable [`KeySnapshot`] current at a time.
//! A refresh builds a complete new snapshot off to the side and publishes it
//! with a single pointer swap, so readers never observe a partially built
//! key set. Refreshes are single-flight; readers never block on a refresh in
//! progress.
//!
//! Failure policy: a refresh that fails after all retries keeps the previous
//! snapshot in service (availability over freshness). Only a cold start with
//! an unreachable identity provider is fatal to the caller.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::prelude::*;
use jsonwebtoken::{Algorithm, DecodingKey};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{AuthError, Result};
use crate::AuthConfig;

/// JWKS document returned by the identity provider.
#[derive(Debug, Deserialize)]
pub struct JwksResponse {
    /// The list of keys.
    pub keys: Vec<JwkKey>,
}

/// A single JWK (JSON Web Key).
///
/// Only the parameters needed for the supported asymmetric key types are
/// modeled; unknown fields are ignored.
#[derive(Debug, Deserialize)]
pub struct JwkKey {
    /// Key type (`RSA`, `EC`, or `OKP`).
    pub kty: String,
    /// Key ID. Keys without one cannot be referenced by tokens and are
    /// skipped.
    pub kid: Option<String>,
    /// Key use (e.g. `sig`).
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    /// Algorithm (e.g. `RS256`, `ES256`, `EdDSA`).
    pub alg: Option<String>,
    /// RSA modulus (base64url).
    pub n: Option<String>,
    /// RSA public exponent (base64url).
    pub e: Option<String>,
    /// Curve name for EC/OKP keys (e.g. `P-256`, `Ed25519`).
    pub crv: Option<String>,
    /// EC/OKP x coordinate or public key (base64url).
    pub x: Option<String>,
    /// EC y coordinate (base64url).
    pub y: Option<String>,
}

/// A verification key ready for signature checks.
///
/// Immutable once constructed; owned by the snapshot it was fetched into.
pub struct SigningKey {
    key_id: String,
    algorithm: Algorithm,
    decoding_key: DecodingKey,
}

impl SigningKey {
    /// The key ID this key is published under.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// The signature algorithm this key verifies.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The decoding key for `jsonwebtoken`.
    #[must_use]
    pub const fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKey({}, {:?})", self.key_id, self.algorithm)
    }
}

/// An immutable snapshot of the identity provider's key set.
#[derive(Debug)]
pub struct KeySnapshot {
    keys: HashMap<String, Arc<SigningKey>>,
    fetched_at: Instant,
}

impl KeySnapshot {
    /// Look up a key by key ID.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<Arc<SigningKey>> {
        self.keys.get(kid).cloned()
    }

    /// Number of keys in this snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether this snapshot holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// When this snapshot was fetched.
    #[must_use]
    pub const fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() >= ttl
    }
}

/// Handle to the spawned background refresh task.
struct RefreshTask {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Key cache with snapshot semantics and proactive background refresh.
///
/// Constructed explicitly by process bootstrap, started and stopped with
/// the process, and passed by reference into the validation pipeline.
pub struct KeyCache {
    config: AuthConfig,
    client: reqwest::Client,
    current: RwLock<Option<Arc<KeySnapshot>>>,
    refresh_lock: tokio::sync::Mutex<()>,
    refresh_task: Mutex<Option<RefreshTask>>,
}

impl KeyCache {
    /// Create a new key cache with the given configuration.
    ///
    /// No network traffic happens until the first lookup or refresh.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created (should never happen with
    /// default TLS).
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to create HTTP client");

        Self {
            config,
            client,
            current: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_task: Mutex::new(None),
        }
    }

    /// The currently published snapshot, if any.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<KeySnapshot>> {
        self.current.read().clone()
    }

    /// Get a signing key by key ID.
    ///
    /// The lookup is O(1) against the current snapshot. A miss, an expired
    /// snapshot, or a cold start triggers exactly one forced refresh before
    /// the lookup is retried. The optional deadline bounds only that
    /// network-bound path.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key ID is absent even after the forced
    /// refresh, and `KeyFetch` on a cold start where the key set cannot be
    /// fetched at all.
    pub async fn get(
        &self,
        kid: &str,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<Arc<SigningKey>> {
        let observed = {
            let snapshot = self.snapshot();
            if let Some(snapshot) = &snapshot {
                if !snapshot.is_expired(self.config.cache_ttl()) {
                    if let Some(key) = snapshot.get(kid) {
                        return Ok(key);
                    }
                    tracing::debug!(kid, "key not in current snapshot, forcing refresh");
                }
            }
            snapshot.map(|s| s.fetched_at())
        };

        let refresh = self.refresh_if_outdated(observed);
        let outcome = match deadline {
            Some(at) => match tokio::time::timeout_at(at, refresh).await {
                Ok(result) => result,
                Err(_) => Err(AuthError::KeyFetch(
                    "deadline exceeded while refreshing key set".to_string(),
                )),
            },
            None => refresh.await,
        };

        if let Err(err) = outcome {
            if self.snapshot().is_none() {
                // Cold start with an unreachable provider is fatal.
                return Err(err);
            }
            tracing::warn!(error = %err, "key refresh failed, serving stale snapshot");
        }

        let snapshot = self
            .snapshot()
            .ok_or_else(|| AuthError::KeyFetch("no key snapshot available".to_string()))?;
        snapshot
            .get(kid)
            .ok_or_else(|| AuthError::KeyNotFound(kid.to_string()))
    }

    /// Unconditionally fetch the key set and publish a new snapshot.
    ///
    /// # Errors
    ///
    /// Returns `KeyFetch` if the fetch fails after all retries; the previous
    /// snapshot, if any, stays published.
    pub async fn force_refresh(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// Start the background refresh task.
    ///
    /// Idempotent: calling this while a task is already running is a no-op.
    /// The task wakes every [`AuthConfig::refresh_interval`] and refreshes
    /// the snapshot; failures keep the stale snapshot in service.
    pub fn start_background_refresh(self: &Arc<Self>) {
        let mut slot = self.refresh_task.lock();
        if let Some(task) = slot.as_ref() {
            if !task.handle.is_finished() {
                tracing::debug!("background key refresh already running");
                return;
            }
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let cache = Arc::clone(self);
        let period = self.config.refresh_interval();

        let handle = tokio::spawn(async move {
            tracing::info!(period_secs = period.as_secs(), "background key refresh started");
            loop {
                tokio::select! {
                    () = tokio::time::sleep(period) => {
                        if let Err(err) = cache.force_refresh().await {
                            tracing::warn!(error = %err, "scheduled key refresh failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("background key refresh stopped");
                        break;
                    }
                }
            }
        });

        *slot = Some(RefreshTask {
            handle,
            shutdown: shutdown_tx,
        });
    }

    /// Signal the background refresh task to stop.
    ///
    /// Used at process shutdown. Safe to call without a running task.
    pub fn stop(&self) {
        if let Some(task) = self.refresh_task.lock().take() {
            let _ = task.shutdown.send(true);
        }
    }

    /// Single-flight refresh. `observed` is the `fetched_at` of the snapshot
    /// the caller saw (`None` on a cold start); if a newer snapshot was
    /// published while waiting for the lock, the fetch is skipped.
    async fn refresh_if_outdated(&self, observed: Option<Instant>) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(current) = self.snapshot() {
            let already_newer = observed.is_none_or(|seen| current.fetched_at() > seen);
            if already_newer {
                tracing::debug!("snapshot already refreshed by a concurrent caller");
                return Ok(());
            }
        }

        self.refresh_locked().await
    }

    /// Fetch and publish a new snapshot. Caller must hold `refresh_lock`.
    async fn refresh_locked(&self) -> Result<()> {
        let keys = self.fetch_keys().await?;
        let snapshot = Arc::new(KeySnapshot {
            keys,
            fetched_at: Instant::now(),
        });
        tracing::debug!(count = snapshot.len(), "publishing new key snapshot");
        *self.current.write() = Some(snapshot);
        Ok(())
    }

    /// Fetch the key set with exponential-backoff retries.
    async fn fetch_keys(&self) -> Result<HashMap<String, Arc<SigningKey>>> {
        let max_attempts = self.config.retry_max_attempts.max(1);
        let mut backoff = Duration::from_millis(self.config.retry_initial_backoff_ms);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            tracing::debug!(url = %self.config.jwks_url(), attempt, max_attempts, "fetching JWKS");
            match self.fetch_once().await {
                Ok(keys) => return Ok(keys),
                Err(err) => {
                    tracing::warn!(attempt, max_attempts, error = %err, "JWKS fetch attempt failed");
                    last_error = Some(err);
                    if attempt < max_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| AuthError::KeyFetch("no fetch attempts were made".to_string())))
    }

    async fn fetch_once(&self) -> Result<HashMap<String, Arc<SigningKey>>> {
        let response: JwksResponse = self
            .client
            .get(self.config.jwks_url())
            .send()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;

        build_key_map(&response)
    }
}

/// Index a JWKS document by key ID, converting each supported key into a
/// [`SigningKey`]. Keys without a `kid` and keys of unsupported types are
/// skipped; malformed key material fails the whole fetch.
fn build_key_map(response: &JwksResponse) -> Result<HashMap<String, Arc<SigningKey>>> {
    if response.keys.is_empty() {
        tracing::warn!("JWKS endpoint returned no keys");
    }

    let mut keys = HashMap::new();
    for key in &response.keys {
        let Some(kid) = key.kid.clone() else {
            tracing::warn!("skipping JWK without kid");
            continue;
        };
        if let Some(signing_key) = parse_key(&kid, key)? {
            keys.insert(kid, Arc::new(signing_key));
        }
    }

    tracing::debug!(count = keys.len(), "indexed JWKS keys");
    Ok(keys)
}

/// Convert one JWK into a `SigningKey`.
///
/// Returns `Ok(None)` for key types and curves this core does not support;
/// returns an error when a supported key carries unusable material (treated
/// as a malformed provider response).
fn parse_key(kid: &str, key: &JwkKey) -> Result<Option<SigningKey>> {
    match key.kty.as_str() {
        "RSA" => {
            let (Some(n), Some(e)) = (&key.n, &key.e) else {
                return Err(AuthError::KeyFetch(format!(
                    "RSA JWK {kid} missing modulus or exponent"
                )));
            };
            let decoding_key = DecodingKey::from_rsa_components(n, e)
                .map_err(|e| AuthError::KeyFetch(format!("invalid RSA JWK {kid}: {e}")))?;

            let algorithm = match key.alg.as_deref() {
                None | Some("RS256") => Algorithm::RS256,
                Some("RS384") => Algorithm::RS384,
                Some("RS512") => Algorithm::RS512,
                Some(other) => {
                    tracing::warn!(kid, alg = other, "unsupported RSA algorithm, skipping key");
                    return Ok(None);
                }
            };

            Ok(Some(SigningKey {
                key_id: kid.to_string(),
                algorithm,
                decoding_key,
            }))
        }
        "EC" => {
            let algorithm = match key.crv.as_deref() {
                Some("P-256") => Algorithm::ES256,
                Some("P-384") => Algorithm::ES384,
                other => {
                    tracing::warn!(kid, crv = other, "unsupported EC curve, skipping key");
                    return Ok(None);
                }
            };
            let (Some(x), Some(y)) = (&key.x, &key.y) else {
                return Err(AuthError::KeyFetch(format!(
                    "EC JWK {kid} missing coordinates"
                )));
            };
            let decoding_key = DecodingKey::from_ec_components(x, y)
                .map_err(|e| AuthError::KeyFetch(format!("invalid EC JWK {kid}: {e}")))?;

            Ok(Some(SigningKey {
                key_id: kid.to_string(),
                algorithm,
                decoding_key,
            }))
        }
        "OKP" => {
            if key.crv.as_deref() != Some("Ed25519") {
                tracing::warn!(kid, crv = ?key.crv, "unsupported OKP curve, skipping key");
                return Ok(None);
            }
            let x = key.x.as_ref().ok_or_else(|| {
                AuthError::KeyFetch(format!("OKP JWK {kid} missing public key"))
            })?;
            let public_key = BASE64_URL_SAFE_NO_PAD
                .decode(x)
                .map_err(|e| AuthError::KeyFetch(format!("invalid OKP JWK {kid}: {e}")))?;

            Ok(Some(SigningKey {
                key_id: kid.to_string(),
                algorithm: Algorithm::EdDSA,
                decoding_key: DecodingKey::from_ed_der(&public_key),
            }))
        }
        other => {
            tracing::warn!(kid, kty = other, "unknown key type, skipping key");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rsa_jwk(kid: &str) -> JwkKey {
        JwkKey {
            kty: "RSA".to_string(),
            kid: Some(kid.to_string()),
            key_use: Some("sig".to_string()),
            alg: Some("RS256".to_string()),
            n: Some(BASE64_URL_SAFE_NO_PAD.encode(vec![0xab; 256])),
            e: Some(BASE64_URL_SAFE_NO_PAD.encode([0x01, 0x00, 0x01])),
            crv: None,
            x: None,
            y: None,
        }
    }

    fn ed25519_jwk(kid: &str) -> JwkKey {
        JwkKey {
            kty: "OKP".to_string(),
            kid: Some(kid.to_string()),
            key_use: Some("sig".to_string()),
            alg: Some("EdDSA".to_string()),
            n: None,
            e: None,
            crv: Some("Ed25519".to_string()),
            // RFC 8037 example public key
            x: Some("11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo".to_string()),
            y: None,
        }
    }

    #[test]
    fn parse_rsa_key() {
        let key = rsa_jwk("rsa-key");
        let parsed = parse_key("rsa-key", &key).unwrap().unwrap();
        assert_eq!(parsed.key_id(), "rsa-key");
        assert_eq!(parsed.algorithm(), Algorithm::RS256);
    }

    #[test]
    fn parse_rsa_key_without_alg_defaults_to_rs256() {
        let key = JwkKey {
            alg: None,
            ..rsa_jwk("rsa-key")
        };
        let parsed = parse_key("rsa-key", &key).unwrap().unwrap();
        assert_eq!(parsed.algorithm(), Algorithm::RS256);
    }

    #[test]
    fn parse_rsa_key_missing_modulus_is_error() {
        let key = JwkKey {
            n: None,
            ..rsa_jwk("rsa-key")
        };
        let result = parse_key("rsa-key", &key);
        assert!(matches!(result, Err(AuthError::KeyFetch(_))));
    }

    #[test]
    fn parse_ed25519_key() {
        let key = ed25519_jwk("ed-key");
        let parsed = parse_key("ed-key", &key).unwrap().unwrap();
        assert_eq!(parsed.algorithm(), Algorithm::EdDSA);
    }

    #[test]
    fn parse_ec_key() {
        let key = JwkKey {
            kty: "EC".to_string(),
            kid: Some("ec-key".to_string()),
            key_use: Some("sig".to_string()),
            alg: None,
            n: None,
            e: None,
            crv: Some("P-256".to_string()),
            x: Some(BASE64_URL_SAFE_NO_PAD.encode([0x11; 32])),
            y: Some(BASE64_URL_SAFE_NO_PAD.encode([0x22; 32])),
        };
        let parsed = parse_key("ec-key", &key).unwrap().unwrap();
        assert_eq!(parsed.algorithm(), Algorithm::ES256);
    }

    #[test]
    fn skip_unsupported_curve() {
        let key = JwkKey {
            crv: Some("X25519".to_string()),
            ..ed25519_jwk("ed-key")
        };
        let parsed = parse_key("ed-key", &key).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn skip_unknown_key_type() {
        let key = JwkKey {
            kty: "oct".to_string(),
            ..rsa_jwk("hmac-key")
        };
        let parsed = parse_key("hmac-key", &key).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn key_map_skips_keys_without_kid() {
        let response = JwksResponse {
            keys: vec![
                JwkKey {
                    kid: None,
                    ..rsa_jwk("ignored")
                },
                rsa_jwk("kept"),
            ],
        };
        let keys = build_key_map(&response).unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains_key("kept"));
    }

    #[test]
    fn key_map_indexes_by_kid() {
        let response = JwksResponse {
            keys: vec![rsa_jwk("key-1"), ed25519_jwk("key-2")],
        };
        let keys = build_key_map(&response).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys["key-1"].algorithm(), Algorithm::RS256);
        assert_eq!(keys["key-2"].algorithm(), Algorithm::EdDSA);
    }

    #[test]
    fn snapshot_lookup_and_expiry() {
        let response = JwksResponse {
            keys: vec![rsa_jwk("key-1")],
        };
        let snapshot = KeySnapshot {
            keys: build_key_map(&response).unwrap(),
            fetched_at: Instant::now(),
        };

        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot.is_empty());
        assert!(snapshot.get("key-1").is_some());
        assert!(snapshot.get("key-2").is_none());

        assert!(!snapshot.is_expired(Duration::from_secs(60)));
        assert!(snapshot.is_expired(Duration::ZERO));
    }

    #[test]
    fn jwks_response_deserializes() {
        let json = r#"{
            "keys": [
                {"kty": "RSA", "kid": "a", "use": "sig", "alg": "RS256", "n": "qg", "e": "AQAB"},
                {"kty": "OKP", "kid": "b", "crv": "Ed25519", "x": "qg"}
            ]
        }"#;
        let response: JwksResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.keys.len(), 2);
        assert_eq!(response.keys[0].kid.as_deref(), Some("a"));
        assert_eq!(response.keys[1].crv.as_deref(), Some("Ed25519"));
    }
}
