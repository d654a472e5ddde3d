//! Authentication for Realm Guard.
//!
//! # Components
//!
//! - `jwks` - per-realm JWKS fetching and signing key cache
//! - `jwt` - bearer token verification against the cached keys
//! - `claims` - token claims and the resulting caller identity

pub mod claims;
pub mod jwks;
pub mod jwt;

pub use claims::{AuthenticatedIdentity, Claims};
pub use jwks::{JwksCacheSettings, JwksClient, KeyStore, SigningKey};
pub use jwt::TokenVerifier;
