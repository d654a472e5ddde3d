//! HTTP routes for Realm Guard.
//!
//! Defines the Axum router and application state.

use crate::auth::{JwksCacheSettings, KeyStore, TokenVerifier};
use crate::config::Config;
use crate::handlers;
use crate::middleware::{require_auth, AuthState, PublicPaths};
use crate::observability::metrics::http_metrics_middleware;
use crate::policy::{with_realms, with_validation_and_realm};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,

    /// Per-realm signing key caches.
    pub key_store: Arc<KeyStore>,

    pub verifier: Arc<TokenVerifier>,
}

impl AppState {
    /// Build the key store and verifier described by `config`.
    pub fn from_config(config: Config) -> Self {
        let settings = JwksCacheSettings {
            ttl: config.jwks_cache_ttl(),
            max_stale: config.jwks_max_stale(),
            min_refresh_interval: config.jwks_min_refresh_interval(),
            fetch_timeout: config.jwks_fetch_timeout(),
        };

        let key_store = Arc::new(KeyStore::new(
            &config.keycloak_internal_url,
            &config.trusted_realms(),
            settings,
        ));
        let verifier = Arc::new(TokenVerifier::new(
            key_store.clone(),
            &config.keycloak_external_url,
            config.audience.clone(),
            config.jwt_clock_skew_seconds,
        ));

        Self {
            config,
            key_store,
            verifier,
        }
    }
}

/// Build the application routes.
///
/// - `/health`, `/ready`, `/metrics` - public (via the allow-list)
/// - `/api/v1/me` - any trusted realm
/// - `/api/v1/tests` - teacher realm, body validated first
///
/// Layers, outermost first: HTTP metrics, 30 second timeout, request
/// tracing, then authentication on matched routes.
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = AuthState {
        verifier: state.verifier.clone(),
        public_paths: Arc::new(PublicPaths::new(&state.config.public_paths)),
    };

    let operational_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let api_routes = Router::new()
        .route(
            "/api/v1/me",
            with_realms(state.config.read_access_realms(), get(handlers::get_me)),
        )
        .route(
            "/api/v1/tests",
            with_validation_and_realm(
                handlers::create_test_schema(),
                [state.config.teacher_realm.clone()],
                post(handlers::create_test),
            ),
        )
        .with_state(state);

    operational_routes
        .merge(metrics_routes)
        .merge(api_routes)
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
