//! Realm Guard error types.
//!
//! Every authentication and authorization failure maps to an HTTP status via
//! the `IntoResponse` impl. Messages returned to clients are generic; the
//! underlying cause is logged server-side where the error is raised.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Generic client-facing message for token failures.
pub const INVALID_TOKEN_MESSAGE: &str = "The access token is invalid or expired";

/// Authentication / authorization error.
///
/// Maps to HTTP status codes:
/// - MissingOrMalformedHeader, InvalidToken, KeyNotFound, InvalidSignature,
///   IssuerMismatch: 401 Unauthorized
/// - KeyResolutionFailure: 503 Service Unavailable
/// - RealmForbidden: 403 Forbidden
/// - SchemaValidationFailure: 400 Bad Request
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing or malformed Authorization header")]
    MissingOrMalformedHeader,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Signing key not found")]
    KeyNotFound,

    #[error("Signing keys could not be resolved: {0}")]
    KeyResolutionFailure(String),

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token issuer mismatch")]
    IssuerMismatch,

    #[error("Realm not permitted: {0}")]
    RealmForbidden(String),

    #[error("Schema validation failed: {0}")]
    SchemaValidationFailure(String),
}

impl AuthError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingOrMalformedHeader
            | AuthError::InvalidToken
            | AuthError::KeyNotFound
            | AuthError::InvalidSignature
            | AuthError::IssuerMismatch => StatusCode::UNAUTHORIZED,
            AuthError::KeyResolutionFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::RealmForbidden(_) => StatusCode::FORBIDDEN,
            AuthError::SchemaValidationFailure(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Bounded label for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            AuthError::MissingOrMalformedHeader => "missing_header",
            AuthError::InvalidToken => "invalid_token",
            AuthError::KeyNotFound => "key_not_found",
            AuthError::KeyResolutionFailure(_) => "key_resolution",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::IssuerMismatch => "issuer_mismatch",
            AuthError::RealmForbidden(_) => "realm_forbidden",
            AuthError::SchemaValidationFailure(_) => "schema_validation",
        }
    }

    /// Message safe to return to the caller.
    fn client_message(&self) -> String {
        match self {
            AuthError::MissingOrMalformedHeader => {
                "Missing or invalid Authorization header".to_string()
            }
            AuthError::InvalidToken
            | AuthError::KeyNotFound
            | AuthError::InvalidSignature
            | AuthError::IssuerMismatch => INVALID_TOKEN_MESSAGE.to_string(),
            AuthError::KeyResolutionFailure(_) => {
                "Authentication service temporarily unavailable".to_string()
            }
            AuthError::RealmForbidden(_) => "Access denied for this realm".to_string(),
            // Schema messages describe the caller's own payload
            AuthError::SchemaValidationFailure(reason) => format!("Validation failed: {reason}"),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            AuthError::KeyResolutionFailure(reason) => {
                tracing::warn!(target: "rg.errors", reason = %reason, "Key resolution failed");
            }
            AuthError::RealmForbidden(realm) => {
                tracing::debug!(target: "rg.errors", realm = %realm, "Realm forbidden");
            }
            _ => {}
        }

        let mut response = (
            status,
            Json(ErrorResponse {
                error: self.client_message(),
            }),
        )
            .into_response();

        // Add WWW-Authenticate header for 401 responses
        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) = "Bearer realm=\"realm-guard\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}
