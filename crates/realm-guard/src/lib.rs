//! Realm Guard
//!
//! Authentication and realm-based authorization for services that accept
//! access tokens issued by a Keycloak-style identity provider:
//!
//! - Per-realm JWKS fetching with a single-flight, bounded-staleness cache
//! - RS256 bearer token verification producing an `AuthenticatedIdentity`
//! - Ordered per-route guard chains (schema validation, then realm check)
//!
//! # Request flow
//!
//! ```text
//! public-path allow-list -> middleware::require_auth (auth::jwt -> auth::jwks)
//!     -> policy guards (schema -> realm) -> handlers
//! ```
//!
//! # Modules
//!
//! - `auth` - key store, token verifier, claims and identity
//! - `config` - service configuration from environment
//! - `errors` - error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - authentication middleware
//! - `observability` - Prometheus metrics
//! - `policy` - per-route guard chains
//! - `routes` - Axum router setup

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod policy;
pub mod routes;
