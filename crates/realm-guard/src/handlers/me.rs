//! Current caller handler.
//!
//! Returns the identity the authentication middleware published.

use crate::auth::AuthenticatedIdentity;
use axum::{Extension, Json};
use serde::Serialize;
use tracing::instrument;

/// Response for `/api/v1/me`.
#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    pub user_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    pub realm: String,

    pub roles: Vec<String>,
}

impl From<&AuthenticatedIdentity> for MeResponse {
    fn from(identity: &AuthenticatedIdentity) -> Self {
        Self {
            user_id: identity.user_id().to_string(),
            username: identity.username().map(str::to_string),
            email: identity.email().map(str::to_string),
            realm: identity.realm().to_string(),
            roles: identity.roles().iter().cloned().collect(),
        }
    }
}

/// Handler for GET /api/v1/me
///
/// ```json
/// {
///   "user_id": "9f1c...",
///   "username": "alice",
///   "email": "alice@example.com",
///   "realm": "teacher-realm",
///   "roles": ["teacher"]
/// }
/// ```
#[instrument(skip_all, name = "rg.handlers.me")]
pub async fn get_me(Extension(identity): Extension<AuthenticatedIdentity>) -> Json<MeResponse> {
    tracing::debug!(target: "rg.handlers.me", realm = %identity.realm(), "Returning caller identity");
    Json(MeResponse::from(&identity))
}
