//! Builder for access token claims.
//!
//! Produces the claim shape a Keycloak realm issues; sign the result with a
//! [`crate::TestKeypair`].

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Builder for test access token claims.
///
/// # Example
/// ```rust,ignore
/// let claims = TestTokenBuilder::new("http://127.0.0.1:4000", "teacher-realm")
///     .for_user("alice")
///     .with_roles(&["teacher"])
///     .expires_in(3600)
///     .build();
/// let token = keypair.sign(&claims);
/// ```
pub struct TestTokenBuilder {
    iss: String,
    sub: Option<String>,
    exp: i64,
    iat: Option<i64>,
    preferred_username: Option<String>,
    email: Option<String>,
    roles: Option<Vec<String>>,
    aud: Option<Value>,
}

impl TestTokenBuilder {
    /// Claims issued by `{issuer_base}/realms/{realm}`, valid for an hour.
    pub fn new(issuer_base: &str, realm: &str) -> Self {
        let now = Utc::now();
        Self {
            iss: format!("{}/realms/{}", issuer_base.trim_end_matches('/'), realm),
            sub: Some("test-subject".to_string()),
            exp: (now + Duration::seconds(3600)).timestamp(),
            iat: Some(now.timestamp()),
            preferred_username: Some("test-user".to_string()),
            email: None,
            roles: Some(Vec::new()),
            aud: None,
        }
    }

    /// Set the subject.
    pub fn for_user(mut self, subject: &str) -> Self {
        self.sub = Some(subject.to_string());
        self
    }

    /// Omit `sub` entirely.
    pub fn without_subject(mut self) -> Self {
        self.sub = None;
        self
    }

    /// Override the full issuer URL.
    pub fn issuer(mut self, iss: &str) -> Self {
        self.iss = iss.to_string();
        self
    }

    pub fn username(mut self, username: &str) -> Self {
        self.preferred_username = Some(username.to_string());
        self
    }

    pub fn email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    /// Set `realm_access.roles`.
    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = Some(roles.iter().map(|r| r.to_string()).collect());
        self
    }

    /// Omit the `realm_access` claim.
    pub fn without_realm_access(mut self) -> Self {
        self.roles = None;
        self
    }

    pub fn audience(mut self, aud: &str) -> Self {
        self.aud = Some(Value::String(aud.to_string()));
        self
    }

    /// Set expiration in seconds from now (negative for already expired).
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    /// Set issued-at timestamp.
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = Some(timestamp);
        self
    }

    /// Omit `iat` entirely.
    pub fn without_issued_at(mut self) -> Self {
        self.iat = None;
        self
    }

    /// Build the claims as a JSON value.
    pub fn build(self) -> Value {
        let mut claims = Map::new();
        claims.insert("iss".to_string(), json!(self.iss));
        if let Some(sub) = self.sub {
            claims.insert("sub".to_string(), json!(sub));
        }
        claims.insert("exp".to_string(), json!(self.exp));
        if let Some(iat) = self.iat {
            claims.insert("iat".to_string(), json!(iat));
        }
        claims.insert("typ".to_string(), json!("Bearer"));
        if let Some(username) = self.preferred_username {
            claims.insert("preferred_username".to_string(), json!(username));
        }
        if let Some(email) = self.email {
            claims.insert("email".to_string(), json!(email));
        }
        if let Some(roles) = self.roles {
            claims.insert("realm_access".to_string(), json!({ "roles": roles }));
        }
        if let Some(aud) = self.aud {
            claims.insert("aud".to_string(), aud);
        }
        Value::Object(claims)
    }
}
