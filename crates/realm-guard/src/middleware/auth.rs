//! Authentication middleware.
//!
//! `require_auth` verifies the bearer token and publishes the resulting
//! [`AuthenticatedIdentity`] in request extensions. Requests whose path is on
//! the public allow-list pass through without authentication.

use crate::auth::{AuthenticatedIdentity, TokenVerifier};
use crate::errors::AuthError;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// Paths that bypass authentication.
///
/// A pattern ending in `*` matches any path with that prefix; any other
/// pattern must match the path exactly.
#[derive(Debug, Clone, Default)]
pub struct PublicPaths {
    exact: Vec<String>,
    prefixes: Vec<String>,
}

impl PublicPaths {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut paths = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            match pattern.strip_suffix('*') {
                Some(prefix) => paths.prefixes.push(prefix.to_string()),
                None => paths.exact.push(pattern.to_string()),
            }
        }
        paths
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.exact.iter().any(|p| p == path)
            || self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub verifier: Arc<TokenVerifier>,
    pub public_paths: Arc<PublicPaths>,
}

/// Authentication middleware.
///
/// # Response
///
/// - Public paths continue without an identity
/// - 401 for a missing, malformed or invalid token
/// - 503 when signing keys cannot be resolved
/// - Otherwise continues with `AuthenticatedIdentity` in extensions
///
/// The span carries the caller's realm once the token is verified.
#[instrument(
    skip_all,
    name = "rg.middleware.auth",
    fields(path = %req.uri().path(), realm = tracing::field::Empty)
)]
pub async fn require_auth(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, AuthError> {
    if state.public_paths.is_public(req.uri().path()) {
        tracing::trace!(target: "rg.middleware.auth", "Public path, skipping authentication");
        return Ok(next.run(req).await);
    }

    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let identity = state.verifier.verify_header(header).await.map_err(|e| {
        tracing::debug!(target: "rg.middleware.auth", error = %e, "Authentication failed");
        e
    })?;

    tracing::Span::current().record("realm", identity.realm());
    tracing::debug!(target: "rg.middleware.auth", "Request authenticated");

    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}
