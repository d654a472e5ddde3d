//! Integration tests for bearer token authentication
//!
//! Each test spawns a real server against a mocked identity provider and
//! drives it over HTTP, covering the `require_auth` middleware, the token
//! verifier and the per-realm key caches together.

use futures::future::join_all;
use realm_guard_test_utils::{
    JwksMock, TestGuardServer, TestKeypair, TestTokenBuilder, STUDENT_REALM, TEACHER_REALM,
};
use reqwest::StatusCode;
use serde_json::json;

/// Identity provider publishing `keypair` for both realms.
async fn idp_with(keypair: &TestKeypair) -> JwksMock {
    let idp = JwksMock::start().await;
    idp.publish(STUDENT_REALM, &[keypair]).await;
    idp.publish(TEACHER_REALM, &[keypair]).await;
    idp
}

async fn get_me(server: &TestGuardServer, token: &str) -> Result<reqwest::Response, anyhow::Error> {
    Ok(reqwest::Client::new()
        .get(format!("{}/api/v1/me", server.url()))
        .bearer_auth(token)
        .send()
        .await?)
}

fn assert_bearer_challenge(response: &reqwest::Response) {
    let challenge = response
        .headers()
        .get("www-authenticate")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(
        challenge.starts_with("Bearer"),
        "401 responses should carry a Bearer challenge, got '{challenge}'"
    );
}

// ============================================================================
// Accepted tokens
// ============================================================================

/// A teacher-realm token reaches both a read route and the teacher-only
/// write route, and the published identity mirrors the token's claims.
#[tokio::test]
async fn test_teacher_token_accepted() -> Result<(), anyhow::Error> {
    // Arrange
    let keypair = TestKeypair::primary("kid-1");
    let idp = idp_with(&keypair).await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let token = keypair.sign(
        &TestTokenBuilder::new(&idp.url(), TEACHER_REALM)
            .for_user("teacher-123")
            .username("ms.frizzle")
            .email("frizzle@school.example")
            .with_roles(&["teacher"])
            .build(),
    );

    // Act
    let response = get_me(&server, &token).await?;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["user_id"], "teacher-123");
    assert_eq!(body["username"], "ms.frizzle");
    assert_eq!(body["email"], "frizzle@school.example");
    assert_eq!(body["realm"], TEACHER_REALM);
    assert_eq!(body["roles"], json!(["teacher"]));

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/tests", server.url()))
        .bearer_auth(&token)
        .json(&json!({"title": "Photosynthesis", "questions": [{"q": "What is chlorophyll?"}]}))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::CREATED);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["created_by"], "teacher-123");
    assert_eq!(body["realm"], TEACHER_REALM);
    assert_eq!(body["test"]["title"], "Photosynthesis");

    Ok(())
}

/// A token without `realm_access` authenticates with no roles.
#[tokio::test]
async fn test_token_without_realm_access_has_no_roles() -> Result<(), anyhow::Error> {
    let keypair = TestKeypair::primary("kid-1");
    let idp = idp_with(&keypair).await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let token = keypair.sign(
        &TestTokenBuilder::new(&idp.url(), STUDENT_REALM)
            .for_user("student-7")
            .without_realm_access()
            .build(),
    );

    let response = get_me(&server, &token).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["user_id"], "student-7");
    assert_eq!(body["roles"], json!([]));

    Ok(())
}

/// `iat` is optional; a signed token without it is still valid.
#[tokio::test]
async fn test_token_without_iat_accepted() -> Result<(), anyhow::Error> {
    let keypair = TestKeypair::primary("kid-1");
    let idp = idp_with(&keypair).await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let token = keypair.sign(
        &TestTokenBuilder::new(&idp.url(), TEACHER_REALM)
            .for_user("teacher-9")
            .without_issued_at()
            .build(),
    );

    let response = get_me(&server, &token).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["user_id"], "teacher-9");

    Ok(())
}

/// Repeated requests with the same key are served from cache.
#[tokio::test]
async fn test_repeated_requests_fetch_keys_once() -> Result<(), anyhow::Error> {
    let keypair = TestKeypair::primary("kid-1");
    let idp = idp_with(&keypair).await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let token = keypair.sign(&TestTokenBuilder::new(&idp.url(), STUDENT_REALM).build());

    for _ in 0..5 {
        assert_eq!(get_me(&server, &token).await?.status(), StatusCode::OK);
    }

    assert_eq!(idp.request_count(STUDENT_REALM).await, 1);
    assert_eq!(idp.request_count(TEACHER_REALM).await, 0);

    Ok(())
}

// ============================================================================
// Rejected tokens
// ============================================================================

#[tokio::test]
async fn test_missing_authorization_header_rejected() -> Result<(), anyhow::Error> {
    let keypair = TestKeypair::primary("kid-1");
    let idp = idp_with(&keypair).await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let response = reqwest::get(format!("{}/api/v1/me", server.url())).await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_bearer_challenge(&response);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"], "Missing or invalid Authorization header");

    // Rejected before any key lookup
    assert_eq!(idp.request_count(STUDENT_REALM).await, 0);
    assert_eq!(idp.request_count(TEACHER_REALM).await, 0);

    Ok(())
}

#[tokio::test]
async fn test_malformed_authorization_header_rejected() -> Result<(), anyhow::Error> {
    let keypair = TestKeypair::primary("kid-1");
    let idp = idp_with(&keypair).await;
    let server = TestGuardServer::spawn(&idp.url()).await?;
    let client = reqwest::Client::new();

    for header in ["Basic dXNlcjpwYXNz", "Bearer", "Bearer not.a.jwt", "token"] {
        let response = client
            .get(format!("{}/api/v1/me", server.url()))
            .header("Authorization", header)
            .send()
            .await?;

        assert_eq!(
            response.status(),
            StatusCode::UNAUTHORIZED,
            "header '{header}' should be rejected"
        );
    }

    Ok(())
}

/// A token signed by a different key under a known `kid` fails signature
/// verification.
#[tokio::test]
async fn test_tampered_signature_rejected() -> Result<(), anyhow::Error> {
    let published = TestKeypair::primary("kid-1");
    let idp = idp_with(&published).await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let forger = TestKeypair::secondary("kid-1");
    let token = forger.sign(
        &TestTokenBuilder::new(&idp.url(), TEACHER_REALM)
            .with_roles(&["teacher"])
            .build(),
    );

    let response = get_me(&server, &token).await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_bearer_challenge(&response);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"], "The access token is invalid or expired");

    Ok(())
}

/// Swapping the payload of a validly signed token breaks the signature.
#[tokio::test]
async fn test_modified_payload_rejected() -> Result<(), anyhow::Error> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    let keypair = TestKeypair::primary("kid-1");
    let idp = idp_with(&keypair).await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let student = TestTokenBuilder::new(&idp.url(), STUDENT_REALM)
        .with_roles(&["student"])
        .build();
    let token = keypair.sign(&student);

    let mut escalated = student.clone();
    escalated["realm_access"]["roles"] = json!(["admin"]);
    let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&escalated)?);

    let parts: Vec<&str> = token.split('.').collect();
    let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

    let response = get_me(&server, &forged).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn test_expired_token_rejected() -> Result<(), anyhow::Error> {
    let keypair = TestKeypair::primary("kid-1");
    let idp = idp_with(&keypair).await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    // Past the default 300 second clock skew
    let token = keypair.sign(
        &TestTokenBuilder::new(&idp.url(), STUDENT_REALM)
            .expires_in(-3600)
            .build(),
    );

    let response = get_me(&server, &token).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn test_recently_expired_token_within_skew_accepted() -> Result<(), anyhow::Error> {
    let keypair = TestKeypair::primary("kid-1");
    let idp = idp_with(&keypair).await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let token = keypair.sign(
        &TestTokenBuilder::new(&idp.url(), STUDENT_REALM)
            .expires_in(-60)
            .build(),
    );

    let response = get_me(&server, &token).await?;
    assert_eq!(response.status(), StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn test_future_iat_beyond_skew_rejected() -> Result<(), anyhow::Error> {
    let keypair = TestKeypair::primary("kid-1");
    let idp = idp_with(&keypair).await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let token = keypair.sign(
        &TestTokenBuilder::new(&idp.url(), STUDENT_REALM)
            .issued_at(chrono::Utc::now().timestamp() + 3600)
            .expires_in(7200)
            .build(),
    );

    let response = get_me(&server, &token).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn test_token_without_subject_rejected() -> Result<(), anyhow::Error> {
    let keypair = TestKeypair::primary("kid-1");
    let idp = idp_with(&keypair).await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let token = keypair.sign(
        &TestTokenBuilder::new(&idp.url(), STUDENT_REALM)
            .without_subject()
            .build(),
    );

    let response = get_me(&server, &token).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn test_token_without_kid_rejected() -> Result<(), anyhow::Error> {
    let keypair = TestKeypair::primary("kid-1");
    let idp = idp_with(&keypair).await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let mut header = keypair.header();
    header.kid = None;
    let token = keypair.sign_with_header(
        &TestTokenBuilder::new(&idp.url(), STUDENT_REALM).build(),
        header,
    );

    let response = get_me(&server, &token).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(idp.request_count(STUDENT_REALM).await, 0);

    Ok(())
}

// ============================================================================
// Issuer and realm
// ============================================================================

/// Tokens from a realm that is not configured are rejected without ever
/// contacting that realm's JWKS endpoint.
#[tokio::test]
async fn test_untrusted_realm_rejected_without_fetch() -> Result<(), anyhow::Error> {
    let keypair = TestKeypair::primary("kid-1");
    let idp = idp_with(&keypair).await;
    idp.publish("master", &[&keypair]).await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let token = keypair.sign(
        &TestTokenBuilder::new(&idp.url(), "master")
            .with_roles(&["admin"])
            .build(),
    );

    let response = get_me(&server, &token).await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(idp.request_count("master").await, 0);

    Ok(())
}

/// A trusted realm name under a different issuer base URL is rejected.
#[tokio::test]
async fn test_foreign_issuer_base_rejected() -> Result<(), anyhow::Error> {
    let keypair = TestKeypair::primary("kid-1");
    let idp = idp_with(&keypair).await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let token = keypair.sign(
        &TestTokenBuilder::new("https://evil.example.com", TEACHER_REALM)
            .with_roles(&["teacher"])
            .build(),
    );

    let response = get_me(&server, &token).await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(idp.request_count(TEACHER_REALM).await, 0);

    Ok(())
}

/// A student-realm key cannot verify a teacher-realm token.
#[tokio::test]
async fn test_keys_are_scoped_to_their_realm() -> Result<(), anyhow::Error> {
    let student_key = TestKeypair::primary("student-kid");
    let teacher_key = TestKeypair::secondary("teacher-kid");
    let idp = JwksMock::start().await;
    idp.publish(STUDENT_REALM, &[&student_key]).await;
    idp.publish(TEACHER_REALM, &[&teacher_key]).await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    // Signed with the student realm's key, claiming the teacher realm
    let token = student_key.sign(
        &TestTokenBuilder::new(&idp.url(), TEACHER_REALM)
            .with_roles(&["teacher"])
            .build(),
    );

    let response = get_me(&server, &token).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn test_audience_enforced_when_configured() -> Result<(), anyhow::Error> {
    let keypair = TestKeypair::primary("kid-1");
    let idp = idp_with(&keypair).await;
    let server =
        TestGuardServer::spawn_with(&idp.url(), &[("KEYCLOAK_AUDIENCE", "lms-api")]).await?;

    let without_aud = keypair.sign(&TestTokenBuilder::new(&idp.url(), STUDENT_REALM).build());
    let wrong_aud = keypair.sign(
        &TestTokenBuilder::new(&idp.url(), STUDENT_REALM)
            .audience("account")
            .build(),
    );
    let right_aud = keypair.sign(
        &TestTokenBuilder::new(&idp.url(), STUDENT_REALM)
            .audience("lms-api")
            .build(),
    );

    assert_eq!(
        get_me(&server, &without_aud).await?.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        get_me(&server, &wrong_aud).await?.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(get_me(&server, &right_aud).await?.status(), StatusCode::OK);

    Ok(())
}

// ============================================================================
// Key resolution
// ============================================================================

/// With a cold cache and a failing identity provider the caller gets 503,
/// not 401: the token may be fine.
#[tokio::test]
async fn test_unreachable_keys_on_cold_start_is_unavailable() -> Result<(), anyhow::Error> {
    let keypair = TestKeypair::primary("kid-1");
    let idp = JwksMock::start().await;
    idp.fail(TEACHER_REALM, 500).await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let token = keypair.sign(&TestTokenBuilder::new(&idp.url(), TEACHER_REALM).build());

    let response = get_me(&server, &token).await?;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"], "Authentication service temporarily unavailable");

    Ok(())
}

/// Concurrent requests naming a `kid` the provider does not publish share
/// one JWKS fetch and are all rejected.
#[tokio::test]
async fn test_concurrent_unknown_kid_requests_share_one_fetch() -> Result<(), anyhow::Error> {
    let published = TestKeypair::primary("kid-1");
    let idp = JwksMock::start().await;
    idp.publish_delayed(
        TEACHER_REALM,
        &[&published],
        std::time::Duration::from_millis(200),
    )
    .await;
    let server = TestGuardServer::spawn(&idp.url()).await?;

    let token = TestKeypair::primary("kid-unknown")
        .sign(&TestTokenBuilder::new(&idp.url(), TEACHER_REALM).build());

    let requests = (0..2).map(|_| get_me(&server, &token));
    let responses = join_all(requests).await;

    for response in responses {
        assert_eq!(response?.status(), StatusCode::UNAUTHORIZED);
    }
    assert_eq!(idp.request_count(TEACHER_REALM).await, 1);

    Ok(())
}

/// A key rotated in after the cache was filled is picked up by the
/// unknown-kid refresh.
#[tokio::test]
async fn test_rotated_key_accepted_after_refresh() -> Result<(), anyhow::Error> {
    let old_key = TestKeypair::primary("kid-old");
    let new_key = TestKeypair::secondary("kid-new");
    let idp = JwksMock::start().await;
    idp.publish(TEACHER_REALM, &[&old_key]).await;
    let server = TestGuardServer::spawn_with(
        &idp.url(),
        &[("JWKS_MIN_REFRESH_INTERVAL_SECONDS", "0")],
    )
    .await?;

    let old_token = old_key.sign(&TestTokenBuilder::new(&idp.url(), TEACHER_REALM).build());
    assert_eq!(get_me(&server, &old_token).await?.status(), StatusCode::OK);

    idp.reset().await;
    idp.publish(TEACHER_REALM, &[&old_key, &new_key]).await;

    let new_token = new_key.sign(&TestTokenBuilder::new(&idp.url(), TEACHER_REALM).build());
    assert_eq!(get_me(&server, &new_token).await?.status(), StatusCode::OK);
    assert_eq!(idp.request_count(TEACHER_REALM).await, 1);

    Ok(())
}
