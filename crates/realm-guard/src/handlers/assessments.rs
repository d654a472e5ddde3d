//! Test (assessment) creation handler.
//!
//! Representative protected write route: teacher realm only, with the body
//! checked against [`create_test_schema`] before the realm check.

use crate::auth::AuthenticatedIdentity;
use crate::policy::{JsonKind, PayloadSchema, RequiredFields, ValidatedPayload};
use axum::{http::StatusCode, Extension, Json};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

/// Schema for `POST /api/v1/tests`.
pub fn create_test_schema() -> Arc<dyn PayloadSchema> {
    Arc::new(
        RequiredFields::new()
            .field("title", JsonKind::String)
            .field("questions", JsonKind::Array)
            .optional("description", JsonKind::String)
            .optional("time_limit_minutes", JsonKind::Integer),
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateTestResponse {
    pub created_by: String,
    pub realm: String,
    pub test: Value,
}

/// Handler for POST /api/v1/tests
///
/// Storage lives in another service; this echoes the validated payload with
/// the caller attached.
#[instrument(skip_all, name = "rg.handlers.create_test")]
pub async fn create_test(
    Extension(identity): Extension<AuthenticatedIdentity>,
    Extension(ValidatedPayload(payload)): Extension<ValidatedPayload>,
) -> (StatusCode, Json<CreateTestResponse>) {
    tracing::info!(target: "rg.handlers.create_test", realm = %identity.realm(), "Test accepted");

    (
        StatusCode::CREATED,
        Json(CreateTestResponse {
            created_by: identity.user_id().to_string(),
            realm: identity.realm().to_string(),
            test: payload.as_ref().clone(),
        }),
    )
}
