//! Bearer token verification.
//!
//! Verifies RS256 access tokens against the issuing realm's JWKS and turns
//! them into an [`AuthenticatedIdentity`].
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only RS256 is accepted; the header must name a `kid`
//! - The realm is read from the unverified `iss` only to pick a key set;
//!   the issuer is re-checked against the verified claims
//! - Untrusted realms are rejected without any outbound fetch
//! - Client-facing messages are generic; causes are logged at debug level

use crate::auth::claims::{AuthenticatedIdentity, Claims};
use crate::auth::jwks::KeyStore;
use crate::errors::AuthError;
use crate::observability::metrics;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

/// Maximum accepted token size in bytes (8KB).
///
/// Larger tokens are rejected before any base64 decoding or signature work.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Extract the token from an `Authorization: Bearer <token>` header value.
///
/// The scheme is matched case-insensitively.
///
/// # Errors
///
/// `AuthError::MissingOrMalformedHeader` when the header is absent, uses a
/// different scheme, or carries an empty token.
pub fn extract_bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let value = header.ok_or(AuthError::MissingOrMalformedHeader)?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or(AuthError::MissingOrMalformedHeader)?;
    if !scheme.eq_ignore_ascii_case("Bearer") {
        return Err(AuthError::MissingOrMalformedHeader);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MissingOrMalformedHeader);
    }

    Ok(token)
}

/// Realm name from an issuer URL of the form `.../realms/{realm}`.
pub fn realm_from_issuer(issuer: &str) -> Option<&str> {
    let (_, realm) = issuer.trim_end_matches('/').rsplit_once("/realms/")?;
    if realm.is_empty() || realm.contains('/') {
        return None;
    }
    Some(realm)
}

/// Reject tokens issued more than `clock_skew_seconds` in the future.
pub fn validate_iat(iat: i64, clock_skew_seconds: i64, now: i64) -> Result<(), AuthError> {
    let max_iat = now.saturating_add(clock_skew_seconds);
    if iat > max_iat {
        tracing::debug!(
            target: "rg.auth.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(AuthError::InvalidToken);
    }
    Ok(())
}

#[derive(Deserialize)]
struct UnverifiedIssuer {
    #[serde(default)]
    iss: Option<String>,
}

/// Read `iss` from the payload without verifying the signature.
fn peek_issuer(token: &str) -> Result<String, AuthError> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let unverified = decode::<UnverifiedIssuer>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| {
            tracing::debug!(target: "rg.auth.jwt", error = %e, "Failed to read unverified JWT payload");
            AuthError::InvalidToken
        })?;

    unverified.claims.iss.ok_or_else(|| {
        tracing::debug!(target: "rg.auth.jwt", "Token rejected: missing iss");
        AuthError::InvalidToken
    })
}

/// Verifies bearer tokens for every trusted realm.
pub struct TokenVerifier {
    key_store: Arc<KeyStore>,

    /// Public base URL the identity provider puts in `iss`.
    external_base_url: String,

    /// Required `aud` value, if any.
    audience: Option<String>,

    clock_skew_seconds: i64,
}

impl TokenVerifier {
    pub fn new(
        key_store: Arc<KeyStore>,
        external_base_url: &str,
        audience: Option<String>,
        clock_skew_seconds: i64,
    ) -> Self {
        Self {
            key_store,
            external_base_url: external_base_url.trim_end_matches('/').to_string(),
            audience,
            clock_skew_seconds,
        }
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.key_store
    }

    /// Issuer value expected from `realm`.
    pub fn expected_issuer(&self, realm: &str) -> String {
        format!("{}/realms/{}", self.external_base_url, realm)
    }

    /// Verify the token in an `Authorization` header value.
    pub async fn verify_header(
        &self,
        header: Option<&str>,
    ) -> Result<AuthenticatedIdentity, AuthError> {
        let token = extract_bearer_token(header).inspect_err(|e| {
            metrics::record_token_validation("error", e.error_type());
        })?;
        self.verify(token).await
    }

    /// Verify a raw token and build the caller's identity.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` for malformed, oversized, expired or not-yet-valid
    ///   tokens, a missing `kid`, a non-RS256 algorithm or a wrong audience
    /// - `IssuerMismatch` for an untrusted realm or unexpected issuer
    /// - `KeyNotFound` / `KeyResolutionFailure` from key lookup
    /// - `InvalidSignature` when the signature does not verify
    #[instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> Result<AuthenticatedIdentity, AuthError> {
        let result = self.verify_inner(token).await;
        match &result {
            Ok(_) => metrics::record_token_validation("success", "none"),
            Err(e) => metrics::record_token_validation("error", e.error_type()),
        }
        result
    }

    async fn verify_inner(&self, token: &str) -> Result<AuthenticatedIdentity, AuthError> {
        if token.len() > MAX_JWT_SIZE_BYTES {
            tracing::debug!(
                target: "rg.auth.jwt",
                token_size = token.len(),
                max_size = MAX_JWT_SIZE_BYTES,
                "Token rejected: size exceeds maximum allowed"
            );
            return Err(AuthError::InvalidToken);
        }

        // 1. Header: algorithm and key id
        let header = decode_header(token).map_err(|e| {
            tracing::debug!(target: "rg.auth.jwt", error = %e, "Failed to decode JWT header");
            AuthError::InvalidToken
        })?;
        if header.alg != Algorithm::RS256 {
            tracing::debug!(target: "rg.auth.jwt", alg = ?header.alg, "Token rejected: unsupported algorithm");
            return Err(AuthError::InvalidToken);
        }
        let kid = header.kid.filter(|k| !k.is_empty()).ok_or_else(|| {
            tracing::debug!(target: "rg.auth.jwt", "Token rejected: missing kid");
            AuthError::InvalidToken
        })?;

        // 2. Realm from the unverified issuer, checked before any fetch
        let issuer = peek_issuer(token)?;
        let realm = realm_from_issuer(&issuer)
            .ok_or_else(|| {
                tracing::debug!(target: "rg.auth.jwt", "Token rejected: issuer has no realm");
                AuthError::IssuerMismatch
            })?
            .to_string();
        let expected_issuer = self.expected_issuer(&realm);
        if issuer != expected_issuer || !self.key_store.is_trusted(&realm) {
            tracing::debug!(
                target: "rg.auth.jwt",
                realm = %realm,
                "Token rejected: issuer not trusted"
            );
            return Err(AuthError::IssuerMismatch);
        }

        // 3. Signing key
        let key = self.key_store.ensure_key_loaded(&realm, &kid).await?;

        // 4. Signature, exp, aud
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = u64::try_from(self.clock_skew_seconds).unwrap_or(0);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let token_data = decode::<Claims>(token, key.decoding_key(), &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => {
                    tracing::debug!(target: "rg.auth.jwt", realm = %realm, kid = %kid, "Token signature verification failed");
                    AuthError::InvalidSignature
                }
                _ => {
                    tracing::debug!(target: "rg.auth.jwt", error = %e, "Token validation failed");
                    AuthError::InvalidToken
                }
            }
        })?;
        let claims = token_data.claims;

        // 5. iat with clock skew, when present
        if let Some(iat) = claims.iat {
            validate_iat(iat, self.clock_skew_seconds, chrono::Utc::now().timestamp())?;
        }

        // 6. Issuer of the verified claims
        if claims.iss != expected_issuer {
            tracing::debug!(target: "rg.auth.jwt", realm = %realm, "Token rejected: verified issuer mismatch");
            return Err(AuthError::IssuerMismatch);
        }

        tracing::debug!(target: "rg.auth.jwt", realm = %realm, "Token validated successfully");
        Ok(AuthenticatedIdentity::from_claims(
            claims,
            realm,
            token.to_string(),
        ))
    }
}
