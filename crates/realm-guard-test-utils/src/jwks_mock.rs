//! Mock identity provider serving realm JWKS documents.
//!
//! Wraps a `wiremock::MockServer`. Mounting a new response for a realm does
//! not replace an existing one (wiremock answers with the first match), so
//! call [`JwksMock::reset`] before switching a realm's behaviour.

use crate::rsa_fixtures::TestKeypair;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// JWKS document containing the public halves of `keys`.
pub fn jwks_document(keys: &[&TestKeypair]) -> Value {
    json!({ "keys": keys.iter().map(|k| k.jwk_json()).collect::<Vec<_>>() })
}

/// Path of a realm's certs endpoint.
pub fn certs_path(realm: &str) -> String {
    format!("/realms/{realm}/protocol/openid-connect/certs")
}

pub struct JwksMock {
    server: MockServer,
}

impl JwksMock {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL, usable as both the internal and external provider URL.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Serve `keys` for `realm`.
    pub async fn publish(&self, realm: &str, keys: &[&TestKeypair]) {
        self.respond(realm, ResponseTemplate::new(200).set_body_json(jwks_document(keys)), None)
            .await;
    }

    /// Serve `keys` for `realm`, failing verification on drop unless the
    /// endpoint is hit exactly `times` times.
    pub async fn publish_expecting(&self, realm: &str, keys: &[&TestKeypair], times: u64) {
        self.respond(
            realm,
            ResponseTemplate::new(200).set_body_json(jwks_document(keys)),
            Some(times),
        )
        .await;
    }

    /// Serve `keys` for `realm` after `delay`.
    pub async fn publish_delayed(&self, realm: &str, keys: &[&TestKeypair], delay: Duration) {
        self.respond(
            realm,
            ResponseTemplate::new(200)
                .set_body_json(jwks_document(keys))
                .set_delay(delay),
            None,
        )
        .await;
    }

    /// Serve an arbitrary JSON body for `realm`.
    pub async fn publish_json(&self, realm: &str, body: Value) {
        self.respond(realm, ResponseTemplate::new(200).set_body_json(body), None)
            .await;
    }

    /// Answer `realm`'s certs endpoint with `status` and no body.
    pub async fn fail(&self, realm: &str, status: u16) {
        self.respond(realm, ResponseTemplate::new(status), None).await;
    }

    /// Drop every mounted response and the recorded request log.
    pub async fn reset(&self) {
        self.server.reset().await;
    }

    /// Requests received for `realm` since the last reset.
    pub async fn request_count(&self, realm: &str) -> usize {
        let expected = certs_path(realm);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == expected)
            .count()
    }

    async fn respond(&self, realm: &str, template: ResponseTemplate, times: Option<u64>) {
        let mock = Mock::given(method("GET"))
            .and(path(certs_path(realm)))
            .respond_with(template);
        let mock = match times {
            Some(times) => mock.expect(times),
            None => mock,
        };
        mock.mount(&self.server).await;
    }
}
