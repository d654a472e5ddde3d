//! Health check handlers.
//!
//! - `/health`: liveness, returns OK while the process is running
//! - `/ready`: readiness, requires signing keys for every trusted realm

use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Liveness probe handler. Checks no dependencies.
pub async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,

    /// Per-realm key availability ("available" / "unavailable").
    pub realms: BTreeMap<String, &'static str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Readiness probe handler.
///
/// Returns 200 once every trusted realm has a usable key set (fetching one
/// if the cache is empty or expired), 503 otherwise. Failure causes are
/// logged; the response only names the realm.
#[tracing::instrument(skip_all, name = "rg.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut realms = BTreeMap::new();
    let mut ready = true;

    for realm in state.key_store.realms() {
        let Some(client) = state.key_store.client(realm) else {
            continue;
        };

        match client.ensure_loaded().await {
            Ok(key_count) => {
                tracing::debug!(target: "rg.health", realm = %realm, key_count, "Realm keys available");
                realms.insert(realm.to_string(), "available");
            }
            Err(e) => {
                tracing::warn!(target: "rg.health", realm = %realm, error = %e, "Readiness check failed: realm keys unavailable");
                realms.insert(realm.to_string(), "unavailable");
                ready = false;
            }
        }
    }

    if ready {
        (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                realms,
                error: None,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                realms,
                error: Some("Service dependencies unavailable".to_string()),
            }),
        )
    }
}
