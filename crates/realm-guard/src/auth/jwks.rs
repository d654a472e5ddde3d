//! JWKS client for fetching and caching realm signing keys.
//!
//! Each trusted realm gets its own [`JwksClient`], which fetches
//! `{internal_url}/realms/{realm}/protocol/openid-connect/certs` and caches
//! the RSA keys it finds by key ID. [`KeyStore`] owns one client per realm.
//!
//! # Cache discipline
//!
//! - Readers clone an `Arc<KeySet>` snapshot under a read lock, so a refresh
//!   never exposes a half-built map.
//! - Refreshes are single-flight per realm: callers queue on a mutex, and a
//!   caller that waited while another refresh finished reuses that outcome
//!   instead of fetching again.
//! - If a refresh fails while a snapshot exists, the snapshot keeps serving
//!   until `ttl + max_stale` has elapsed since it was loaded.
//! - Refreshes triggered by an unknown `kid` are spaced by
//!   `min_refresh_interval`.

use crate::errors::AuthError;
use crate::observability::metrics;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// JSON Web Key entry from a realm's certs endpoint.
///
/// All fields are optional at the type level so that one incomplete entry
/// cannot fail the whole document; completeness is checked when the entry is
/// turned into a [`SigningKey`].
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: Option<String>,
    pub kid: Option<String>,
    /// RSA modulus (base64url, big-endian unsigned).
    pub n: Option<String>,
    /// RSA public exponent (base64url, big-endian unsigned).
    pub e: Option<String>,
    #[serde(rename = "use")]
    pub key_use: Option<String>,
}

/// JWKS document. Entries are kept as raw JSON so that each one is
/// deserialized on its own and a malformed entry is skipped, not fatal.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksResponse {
    pub keys: Vec<serde_json::Value>,
}

/// Verified-usable RSA public key from the realm's JWKS.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    modulus: Arc<[u8]>,
    exponent: Arc<[u8]>,
    decoding_key: DecodingKey,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("modulus_bits", &(self.modulus.len() * 8))
            .finish()
    }
}

impl SigningKey {
    /// Build a signing key from a JWK entry.
    ///
    /// Returns the reason the entry was skipped when it is not an RSA key,
    /// is meant for encryption, or lacks a decodable `kid`/`n`/`e`.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, &'static str> {
        if jwk.kty.as_deref() != Some("RSA") {
            return Err("not an RSA key");
        }
        if jwk.key_use.as_deref().is_some_and(|u| u != "sig") {
            return Err("not a signing key");
        }

        let kid = jwk
            .kid
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or("missing kid")?;
        let n = jwk.n.as_deref().ok_or("missing modulus")?;
        let e = jwk.e.as_deref().ok_or("missing exponent")?;

        let modulus = decode_unsigned(n).ok_or("undecodable modulus")?;
        let exponent = decode_unsigned(e).ok_or("undecodable exponent")?;

        // Hand jsonwebtoken the canonical (unpadded, no leading zero) form
        let decoding_key = DecodingKey::from_rsa_components(
            &URL_SAFE_NO_PAD.encode(&modulus),
            &URL_SAFE_NO_PAD.encode(&exponent),
        )
        .map_err(|_| "rejected RSA components")?;

        Ok(Self {
            kid: kid.to_string(),
            modulus: modulus.into(),
            exponent: exponent.into(),
            decoding_key,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Big-endian RSA modulus with leading zero bytes stripped.
    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    /// Big-endian RSA exponent with leading zero bytes stripped.
    pub fn exponent(&self) -> &[u8] {
        &self.exponent
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

/// Decode a base64url unsigned big integer, tolerating padding.
///
/// Returns `None` for invalid base64 or a value that is zero/empty.
fn decode_unsigned(value: &str) -> Option<Vec<u8>> {
    let bytes = URL_SAFE_NO_PAD.decode(value.trim_end_matches('=')).ok()?;
    let first_nonzero = bytes.iter().position(|b| *b != 0)?;
    bytes.get(first_nonzero..).map(<[u8]>::to_vec)
}

/// Immutable snapshot of one realm's keys.
#[derive(Debug)]
pub struct KeySet {
    keys: HashMap<String, SigningKey>,
    loaded_at: Instant,
}

impl KeySet {
    /// Parse a JWKS body into a key set, skipping unusable entries.
    pub fn from_response(response: JwksResponse, loaded_at: Instant) -> Self {
        let mut keys = HashMap::new();

        for entry in response.keys {
            let jwk: Jwk = match serde_json::from_value(entry) {
                Ok(jwk) => jwk,
                Err(e) => {
                    tracing::debug!(target: "rg.auth.jwks", error = %e, "Skipping malformed JWK entry");
                    continue;
                }
            };

            match SigningKey::from_jwk(&jwk) {
                Ok(key) => {
                    if keys.contains_key(key.kid()) {
                        tracing::debug!(target: "rg.auth.jwks", kid = %key.kid(), "Ignoring duplicate kid");
                        continue;
                    }
                    keys.insert(key.kid().to_string(), key);
                }
                Err(reason) => {
                    tracing::debug!(
                        target: "rg.auth.jwks",
                        kid = ?jwk.kid,
                        kty = ?jwk.kty,
                        reason,
                        "Skipping JWK entry"
                    );
                }
            }
        }

        Self { keys, loaded_at }
    }

    pub fn get(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.loaded_at) < ttl
    }

    fn is_usable(&self, ttl: Duration, max_stale: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.loaded_at) < ttl.saturating_add(max_stale)
    }
}

/// Cache timing policy shared by every realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JwksCacheSettings {
    /// How long a fetched key set is considered fresh.
    pub ttl: Duration,
    /// How long past `ttl` a key set may be served when refresh fails.
    pub max_stale: Duration,
    /// Minimum spacing between refresh attempts that are not forced by an
    /// expired cache.
    pub min_refresh_interval: Duration,
    /// Outbound fetch timeout.
    pub fetch_timeout: Duration,
}

impl Default for JwksCacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_stale: Duration::from_secs(86_400),
            min_refresh_interval: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Snapshot plus a counter bumped by every completed refresh attempt.
/// Both are read under one lock so a waiter can tell whether a refresh
/// finished while it was queued.
#[derive(Default)]
struct CacheState {
    snapshot: Option<Arc<KeySet>>,
    generation: u64,
}

/// Outcome of the latest refresh attempt, shared with queued callers.
struct RefreshState {
    last_attempt: Option<Instant>,
    last_outcome: Result<(), AuthError>,
    /// The fetch itself failed, even if stale keys were served.
    last_fetch_failed: bool,
}

/// JWKS client for one realm.
pub struct JwksClient {
    /// Realm name, used for logs and metrics.
    realm: String,

    /// URL of the realm's certs endpoint.
    jwks_url: String,

    /// HTTP client for fetching JWKS.
    http_client: reqwest::Client,

    /// Current key snapshot.
    cache: RwLock<CacheState>,

    /// Single-flight guard for refreshes.
    refresh: Mutex<RefreshState>,

    settings: JwksCacheSettings,
}

impl JwksClient {
    /// Create a JWKS client for `realm` served by the identity provider at
    /// `internal_base_url`.
    pub fn new(internal_base_url: &str, realm: &str, settings: JwksCacheSettings) -> Self {
        let jwks_url = format!(
            "{}/realms/{}/protocol/openid-connect/certs",
            internal_base_url.trim_end_matches('/'),
            realm
        );

        let http_client = reqwest::Client::builder()
            .timeout(settings.fetch_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "rg.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        // A refresh interval longer than the TTL would pin an expired cache
        let settings = JwksCacheSettings {
            min_refresh_interval: settings.min_refresh_interval.min(settings.ttl),
            ..settings
        };

        Self {
            realm: realm.to_string(),
            jwks_url,
            http_client,
            cache: RwLock::new(CacheState::default()),
            refresh: Mutex::new(RefreshState {
                last_attempt: None,
                last_outcome: Ok(()),
                last_fetch_failed: false,
            }),
            settings,
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    pub fn settings(&self) -> JwksCacheSettings {
        self.settings
    }

    /// Resolve the signing key for `kid`.
    ///
    /// A fresh cached entry is returned without network access. Otherwise
    /// one refresh is attempted (or a concurrent one is joined) and the
    /// lookup is repeated.
    ///
    /// # Errors
    ///
    /// - `AuthError::KeyNotFound` if the key set does not contain `kid`.
    /// - `AuthError::KeyResolutionFailure` if no usable key set can be
    ///   obtained (cold start with the identity provider unreachable, or a
    ///   stale key set past its staleness bound).
    #[instrument(skip(self), fields(realm = %self.realm, kid = %kid))]
    pub async fn ensure_key_loaded(&self, kid: &str) -> Result<SigningKey, AuthError> {
        let key_set = self.resolve(Some(kid)).await?;

        match key_set.get(kid) {
            Some(key) => Ok(key.clone()),
            None => {
                tracing::warn!(target: "rg.auth.jwks", realm = %self.realm, kid = %kid, "Key not found in JWKS after refresh");
                Err(AuthError::KeyNotFound)
            }
        }
    }

    /// Make sure a usable key set is loaded, refreshing if it has expired.
    ///
    /// Returns the number of cached keys.
    pub async fn ensure_loaded(&self) -> Result<usize, AuthError> {
        self.resolve(None).await.map(|set| set.len())
    }

    /// Force a refresh regardless of TTL and refresh spacing.
    pub async fn force_refresh(&self) -> Result<(), AuthError> {
        let mut state = self.refresh.lock().await;
        self.refresh_locked(&mut state).await
    }

    /// Number of keys in the current snapshot (zero when nothing is cached).
    pub async fn cached_key_count(&self) -> usize {
        self.cache
            .read()
            .await
            .snapshot
            .as_ref()
            .map_or(0, |set| set.len())
    }

    /// Drop the cached key set.
    pub async fn clear_cache(&self) {
        let mut cache = self.cache.write().await;
        cache.snapshot = None;
    }

    async fn resolve(&self, kid: Option<&str>) -> Result<Arc<KeySet>, AuthError> {
        // Generation is read together with the snapshot; see CacheState
        let (observed_generation, snapshot) = {
            let cache = self.cache.read().await;
            (cache.generation, cache.snapshot.clone())
        };

        if let Some(set) = &snapshot {
            let covers_kid = kid.map_or(true, |k| set.get(k).is_some());
            if covers_kid && set.is_fresh(self.settings.ttl, Instant::now()) {
                tracing::debug!(target: "rg.auth.jwks", realm = %self.realm, "JWKS cache hit");
                return Ok(set.clone());
            }
        }

        let outcome = {
            let mut state = self.refresh.lock().await;
            let current_generation = self.cache.read().await.generation;

            if current_generation != observed_generation {
                // Another caller refreshed while we were queued
                tracing::debug!(target: "rg.auth.jwks", realm = %self.realm, "Joining completed JWKS refresh");
                state.last_outcome.clone()
            } else if self.refresh_throttled(&state, snapshot.as_deref()) {
                tracing::debug!(target: "rg.auth.jwks", realm = %self.realm, "JWKS refresh skipped, last attempt too recent");
                state.last_outcome.clone()
            } else {
                self.refresh_locked(&mut state).await
            }
        };
        outcome?;

        let cache = self.cache.read().await;
        let now = Instant::now();
        cache
            .snapshot
            .as_ref()
            .filter(|set| set.is_usable(self.settings.ttl, self.settings.max_stale, now))
            .cloned()
            .ok_or_else(|| {
                AuthError::KeyResolutionFailure(format!(
                    "no usable key set for realm '{}'",
                    self.realm
                ))
            })
    }

    /// A refresh is throttled only when the cached set is still fresh (an
    /// unknown-kid lookup) or the last fetch failed, and that attempt was
    /// within `min_refresh_interval`. A failed fetch counts even when stale
    /// keys were served in its place.
    fn refresh_throttled(&self, state: &RefreshState, snapshot: Option<&KeySet>) -> bool {
        let Some(last_attempt) = state.last_attempt else {
            return false;
        };
        if last_attempt.elapsed() >= self.settings.min_refresh_interval {
            return false;
        }

        let fresh = snapshot.is_some_and(|set| set.is_fresh(self.settings.ttl, Instant::now()));
        fresh || state.last_fetch_failed
    }

    /// Fetch and swap in a new key set. Must be called with the refresh
    /// mutex held.
    async fn refresh_locked(&self, state: &mut RefreshState) -> Result<(), AuthError> {
        let started = Instant::now();
        let fetched = self.fetch_key_set().await;

        let mut cache = self.cache.write().await;
        cache.generation = cache.generation.wrapping_add(1);
        let now = Instant::now();
        let fetch_failed = fetched.is_err();

        let outcome = match fetched {
            Ok(set) => {
                tracing::info!(
                    target: "rg.auth.jwks",
                    realm = %self.realm,
                    key_count = set.len(),
                    "JWKS cache refreshed"
                );
                cache.snapshot = Some(Arc::new(set));
                metrics::record_jwks_refresh(&self.realm, "success", started.elapsed());
                Ok(())
            }
            Err(reason) => {
                let stale_usable = cache.snapshot.as_ref().is_some_and(|set| {
                    set.is_usable(self.settings.ttl, self.settings.max_stale, now)
                });

                if stale_usable {
                    tracing::warn!(
                        target: "rg.auth.jwks",
                        realm = %self.realm,
                        reason = %reason,
                        "JWKS refresh failed, serving previously loaded keys"
                    );
                    metrics::record_jwks_refresh(&self.realm, "stale", started.elapsed());
                    Ok(())
                } else {
                    let dropped_stale = cache.snapshot.take().is_some();
                    tracing::error!(
                        target: "rg.auth.jwks",
                        realm = %self.realm,
                        reason = %reason,
                        dropped_stale,
                        "JWKS refresh failed with no usable keys"
                    );
                    metrics::record_jwks_refresh(&self.realm, "error", started.elapsed());
                    Err(AuthError::KeyResolutionFailure(reason))
                }
            }
        };
        drop(cache);

        state.last_attempt = Some(now);
        state.last_outcome = outcome.clone();
        state.last_fetch_failed = fetch_failed;
        outcome
    }

    async fn fetch_key_set(&self) -> Result<KeySet, String> {
        tracing::debug!(target: "rg.auth.jwks", url = %self.jwks_url, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    format!("JWKS fetch timed out after {:?}", self.settings.fetch_timeout)
                } else {
                    format!("JWKS fetch failed: {e}")
                }
            })?;

        if !response.status().is_success() {
            return Err(format!("JWKS endpoint returned {}", response.status()));
        }

        let body: JwksResponse = response
            .json()
            .await
            .map_err(|e| format!("failed to parse JWKS response: {e}"))?;

        let set = KeySet::from_response(body, Instant::now());
        if set.is_empty() {
            return Err("JWKS contained no usable RSA signing keys".to_string());
        }

        Ok(set)
    }
}

/// Owns one [`JwksClient`] per trusted realm.
///
/// Constructed once at startup and shared behind an `Arc`; there is no
/// process-global key state.
pub struct KeyStore {
    clients: HashMap<String, Arc<JwksClient>>,
}

impl KeyStore {
    /// Create a store with a client for every realm in `realms`.
    pub fn new(
        internal_base_url: &str,
        realms: &BTreeSet<String>,
        settings: JwksCacheSettings,
    ) -> Self {
        let clients = realms
            .iter()
            .map(|realm| {
                (
                    realm.clone(),
                    Arc::new(JwksClient::new(internal_base_url, realm, settings)),
                )
            })
            .collect();

        Self { clients }
    }

    /// Whether tokens from `realm` are accepted at all.
    pub fn is_trusted(&self, realm: &str) -> bool {
        self.clients.contains_key(realm)
    }

    pub fn realms(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    pub fn client(&self, realm: &str) -> Option<&Arc<JwksClient>> {
        self.clients.get(realm)
    }

    /// Resolve the signing key `kid` for `realm`.
    ///
    /// # Errors
    ///
    /// `AuthError::IssuerMismatch` for a realm that is not trusted; otherwise
    /// see [`JwksClient::ensure_key_loaded`].
    pub async fn ensure_key_loaded(&self, realm: &str, kid: &str) -> Result<SigningKey, AuthError> {
        let client = self.clients.get(realm).ok_or_else(|| {
            tracing::debug!(target: "rg.auth.jwks", realm = %realm, "Realm is not trusted");
            AuthError::IssuerMismatch
        })?;

        client.ensure_key_loaded(kid).await
    }
}
