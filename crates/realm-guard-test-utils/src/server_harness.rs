//! Test server harness for E2E testing
//!
//! Provides `TestGuardServer` for spawning real Realm Guard instances in tests.

use metrics_exporter_prometheus::PrometheusBuilder;
use realm_guard::config::Config;
use realm_guard::routes::{self, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Realm accepted for student tokens.
pub const STUDENT_REALM: &str = "student-realm";

/// Realm accepted for teacher tokens.
pub const TEACHER_REALM: &str = "teacher-realm";

/// Test harness for spawning a Realm Guard server.
///
/// # Example
/// ```rust,ignore
/// let idp = JwksMock::start().await;
/// let server = TestGuardServer::spawn(&idp.url()).await?;
///
/// let response = reqwest::get(format!("{}/health", server.url())).await?;
/// assert_eq!(response.status(), 200);
/// ```
pub struct TestGuardServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    _handle: JoinHandle<()>,
}

impl TestGuardServer {
    /// Spawn a server trusting `student-realm` and `teacher-realm` of the
    /// identity provider at `idp_url`.
    pub async fn spawn(idp_url: &str) -> Result<Self, anyhow::Error> {
        Self::spawn_with(idp_url, &[]).await
    }

    /// Spawn with extra or overriding environment variables.
    pub async fn spawn_with(
        idp_url: &str,
        overrides: &[(&str, &str)],
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("KEYCLOAK_INTERNAL_URL".to_string(), idp_url.to_string()),
            ("KEYCLOAK_EXTERNAL_URL".to_string(), idp_url.to_string()),
            ("KEYCLOAK_STUDENT_REALM".to_string(), STUDENT_REALM.to_string()),
            ("KEYCLOAK_TEACHER_REALM".to_string(), TEACHER_REALM.to_string()),
            ("JWKS_FETCH_TIMEOUT_SECONDS".to_string(), "2".to_string()),
        ]);
        for (key, value) in overrides {
            vars.insert(key.to_string(), value.to_string());
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let state = Arc::new(AppState::from_config(config));

        // A detached recorder: the global one can only be installed once
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state.clone(), metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            state,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Application state, for inspecting the key caches.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn config(&self) -> &Config {
        &self.state.config
    }
}

impl Drop for TestGuardServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
