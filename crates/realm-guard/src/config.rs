//! Realm Guard configuration.
//!
//! Configuration is loaded from environment variables. Nothing here is
//! secret (only public identity-provider coordinates), so `Debug` is derived.

use std::collections::{BTreeSet, HashMap};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default JWKS cache TTL (1 hour).
pub const DEFAULT_JWKS_CACHE_TTL_SECONDS: u64 = 3600;

/// Default window past TTL during which a stale key set may still be served
/// when the identity provider is unreachable (24 hours).
pub const DEFAULT_JWKS_MAX_STALE_SECONDS: u64 = 86_400;

/// Default minimum spacing between refreshes triggered by unknown `kid`s.
pub const DEFAULT_JWKS_MIN_REFRESH_INTERVAL_SECONDS: u64 = 30;

/// Default outbound JWKS fetch timeout.
pub const DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS: u64 = 10;

/// Default JWT clock skew tolerance (5 minutes).
pub const DEFAULT_CLOCK_SKEW_SECONDS: i64 = 300;

/// Maximum allowed JWT clock skew tolerance (10 minutes).
pub const MAX_CLOCK_SKEW_SECONDS: i64 = 600;

/// Paths that bypass authentication unless `PUBLIC_PATHS` overrides them.
pub const DEFAULT_PUBLIC_PATHS: &str = "/health,/ready,/metrics";

/// Realm Guard configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Identity provider base URL reachable from inside the deployment
    /// network. JWKS documents are fetched from here.
    pub keycloak_internal_url: String,

    /// Identity provider base URL as seen by clients. Token `iss` claims are
    /// compared against `{keycloak_external_url}/realms/{realm}`.
    pub keycloak_external_url: String,

    /// Realm that student accounts live in.
    pub student_realm: String,

    /// Realm that teacher accounts live in.
    pub teacher_realm: String,

    /// Expected `aud` claim. Audience is not checked when unset.
    pub audience: Option<String>,

    /// JWKS cache TTL in seconds.
    pub jwks_cache_ttl_seconds: u64,

    /// How long past TTL a stale key set may be served if refresh fails.
    /// Zero disables stale serving.
    pub jwks_max_stale_seconds: u64,

    /// Minimum seconds between refreshes triggered by an unknown `kid` while
    /// the cache is still fresh.
    pub jwks_min_refresh_interval_seconds: u64,

    /// Outbound JWKS fetch timeout in seconds.
    pub jwks_fetch_timeout_seconds: u64,

    /// JWT clock skew tolerance in seconds (`exp` leeway and `iat` bound).
    pub jwt_clock_skew_seconds: i64,

    /// Path patterns that bypass authentication. A trailing `*` makes the
    /// pattern a prefix match; otherwise the path must match exactly.
    pub public_paths: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid URL configuration: {0}")]
    InvalidUrl(String),

    #[error("Invalid realm configuration: {0}")]
    InvalidRealm(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid JWKS cache configuration: {0}")]
    InvalidJwksSetting(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let keycloak_internal_url = required_url(vars, "KEYCLOAK_INTERNAL_URL")?;
        let keycloak_external_url = required_url(vars, "KEYCLOAK_EXTERNAL_URL")?;

        let student_realm = required_realm(vars, "KEYCLOAK_STUDENT_REALM")?;
        let teacher_realm = required_realm(vars, "KEYCLOAK_TEACHER_REALM")?;

        let audience = vars
            .get("KEYCLOAK_AUDIENCE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let jwks_cache_ttl_seconds = parse_seconds(
            vars,
            "JWKS_CACHE_TTL_SECONDS",
            DEFAULT_JWKS_CACHE_TTL_SECONDS,
            false,
        )?;
        let jwks_max_stale_seconds = parse_seconds(
            vars,
            "JWKS_MAX_STALE_SECONDS",
            DEFAULT_JWKS_MAX_STALE_SECONDS,
            true,
        )?;
        let jwks_min_refresh_interval_seconds = parse_seconds(
            vars,
            "JWKS_MIN_REFRESH_INTERVAL_SECONDS",
            DEFAULT_JWKS_MIN_REFRESH_INTERVAL_SECONDS,
            true,
        )?;
        let jwks_fetch_timeout_seconds = parse_seconds(
            vars,
            "JWKS_FETCH_TIMEOUT_SECONDS",
            DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS,
            false,
        )?;

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew_seconds = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value <= 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got {}",
                    value
                )));
            }

            if value > MAX_CLOCK_SKEW_SECONDS {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW_SECONDS, value
                )));
            }

            value
        } else {
            DEFAULT_CLOCK_SKEW_SECONDS
        };

        let public_paths = vars
            .get("PUBLIC_PATHS")
            .map(String::as_str)
            .unwrap_or(DEFAULT_PUBLIC_PATHS)
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(ToString::to_string)
            .collect();

        Ok(Config {
            bind_address,
            keycloak_internal_url,
            keycloak_external_url,
            student_realm,
            teacher_realm,
            audience,
            jwks_cache_ttl_seconds,
            jwks_max_stale_seconds,
            jwks_min_refresh_interval_seconds,
            jwks_fetch_timeout_seconds,
            jwt_clock_skew_seconds,
            public_paths,
        })
    }

    /// Realms whose tokens this service accepts.
    pub fn trusted_realms(&self) -> BTreeSet<String> {
        BTreeSet::from([self.student_realm.clone(), self.teacher_realm.clone()])
    }

    /// Realms with read access (students and teachers).
    pub fn read_access_realms(&self) -> BTreeSet<String> {
        self.trusted_realms()
    }

    pub fn jwks_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_cache_ttl_seconds)
    }

    pub fn jwks_max_stale(&self) -> Duration {
        Duration::from_secs(self.jwks_max_stale_seconds)
    }

    pub fn jwks_min_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.jwks_min_refresh_interval_seconds)
    }

    pub fn jwks_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.jwks_fetch_timeout_seconds)
    }
}

fn required_url(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    let value = vars
        .get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;

    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(ConfigError::InvalidUrl(format!(
            "{} must start with http:// or https://, got '{}'",
            key, value
        )));
    }

    Ok(value.trim_end_matches('/').to_string())
}

fn required_realm(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    let value = vars
        .get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;

    // Realm names are interpolated into URL paths
    if value.contains('/') {
        return Err(ConfigError::InvalidRealm(format!(
            "{} must not contain '/', got '{}'",
            key, value
        )));
    }

    Ok(value.to_string())
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
    allow_zero: bool,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(key) else {
        return Ok(default);
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidJwksSetting(format!(
            "{} must be a valid non-negative integer, got '{}': {}",
            key, value_str, e
        ))
    })?;

    if value == 0 && !allow_zero {
        return Err(ConfigError::InvalidJwksSetting(format!(
            "{} must be greater than 0",
            key
        )));
    }

    Ok(value)
}
