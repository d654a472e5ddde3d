//! Integration tests for the operational endpoints
//!
//! `/health`, `/ready` and `/metrics` sit on the public allow-list and must
//! answer without a token.

use realm_guard_test_utils::{
    JwksMock, TestGuardServer, TestKeypair, TestTokenBuilder, STUDENT_REALM, TEACHER_REALM,
};
use reqwest::StatusCode;

#[tokio::test]
async fn test_health_is_public() -> Result<(), anyhow::Error> {
    let idp = JwksMock::start().await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let response = reqwest::get(format!("{}/health", server.url())).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await?, "OK");

    // Liveness never touches the identity provider
    assert_eq!(idp.request_count(STUDENT_REALM).await, 0);
    assert_eq!(idp.request_count(TEACHER_REALM).await, 0);

    Ok(())
}

#[tokio::test]
async fn test_ready_when_every_realm_has_keys() -> Result<(), anyhow::Error> {
    let keypair = TestKeypair::primary("kid-1");
    let idp = JwksMock::start().await;
    idp.publish(STUDENT_REALM, &[&keypair]).await;
    idp.publish(TEACHER_REALM, &[&keypair]).await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let response = reqwest::get(format!("{}/ready", server.url())).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["realms"][STUDENT_REALM], "available");
    assert_eq!(body["realms"][TEACHER_REALM], "available");
    assert!(body.get("error").is_none());

    // Readiness warmed the caches; a token request needs no further fetch
    let token = keypair.sign(&TestTokenBuilder::new(&idp.url(), STUDENT_REALM).build());
    let response = reqwest::Client::new()
        .get(format!("{}/api/v1/me", server.url()))
        .bearer_auth(token)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(idp.request_count(STUDENT_REALM).await, 1);

    Ok(())
}

#[tokio::test]
async fn test_not_ready_when_a_realm_is_unreachable() -> Result<(), anyhow::Error> {
    let keypair = TestKeypair::primary("kid-1");
    let idp = JwksMock::start().await;
    idp.publish(STUDENT_REALM, &[&keypair]).await;
    idp.fail(TEACHER_REALM, 502).await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let response = reqwest::get(format!("{}/ready", server.url())).await?;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["status"], "not_ready");
    assert_eq!(body["realms"][STUDENT_REALM], "available");
    assert_eq!(body["realms"][TEACHER_REALM], "unavailable");
    assert_eq!(body["error"], "Service dependencies unavailable");

    // The upstream failure reason is not exposed
    let raw = body.to_string();
    assert!(!raw.contains("502"), "response leaked upstream detail: {raw}");

    Ok(())
}

#[tokio::test]
async fn test_metrics_is_public() -> Result<(), anyhow::Error> {
    let idp = JwksMock::start().await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let response = reqwest::get(format!("{}/metrics", server.url())).await?;

    assert_eq!(response.status(), StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn test_unknown_route_is_not_found() -> Result<(), anyhow::Error> {
    let idp = JwksMock::start().await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let response = reqwest::get(format!("{}/api/v1/unknown", server.url())).await?;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    Ok(())
}

/// Shrinking the allow-list puts the operational endpoints behind
/// authentication.
#[tokio::test]
async fn test_public_paths_are_configurable() -> Result<(), anyhow::Error> {
    let idp = JwksMock::start().await;
    let server = TestGuardServer::spawn_with(&idp.url(), &[("PUBLIC_PATHS", "/health")]).await?;

    let health = reqwest::get(format!("{}/health", server.url())).await?;
    let metrics = reqwest::get(format!("{}/metrics", server.url())).await?;

    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(metrics.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}
