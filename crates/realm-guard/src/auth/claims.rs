//! Access token claims and the authenticated identity derived from them.
//!
//! `sub` and the raw token are redacted in Debug output.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Realm-level role grants as issued by the identity provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RealmAccess {
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Claims of a verified access token.
#[derive(Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID) - redacted in Debug output.
    pub sub: String,

    /// Issuer URL, `{external_base}/realms/{realm}`.
    pub iss: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds). Optional in the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Absent `realm_access` means no realm roles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm_access: Option<RealmAccess>,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("sub", &"[REDACTED]")
            .field("iss", &self.iss)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("preferred_username", &self.preferred_username)
            .field("realm_access", &self.realm_access)
            .finish_non_exhaustive()
    }
}

impl Claims {
    /// Realm roles as a set; empty when `realm_access` is absent.
    pub fn realm_roles(&self) -> BTreeSet<String> {
        self.realm_access
            .as_ref()
            .map(|access| access.roles.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Caller identity attached to a request after successful verification.
///
/// Immutable once built. Handlers read it through the accessors.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    subject: String,
    username: Option<String>,
    email: Option<String>,
    roles: BTreeSet<String>,
    realm: String,
    raw_token: String,
}

impl AuthenticatedIdentity {
    /// Build the identity for a verified token from `realm`.
    pub fn from_claims(claims: Claims, realm: String, raw_token: String) -> Self {
        let roles = claims.realm_roles();
        Self {
            subject: claims.sub,
            username: claims.preferred_username,
            email: claims.email,
            roles,
            realm,
            raw_token,
        }
    }

    /// Token subject (`sub`).
    pub fn user_id(&self) -> &str {
        &self.subject
    }

    /// `preferred_username`, if the token carried one.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    /// Realm the token was issued by.
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Original bearer token, for forwarding to downstream services.
    pub fn raw_token(&self) -> &str {
        &self.raw_token
    }
}

impl fmt::Debug for AuthenticatedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedIdentity")
            .field("subject", &"[REDACTED]")
            .field("username", &self.username)
            .field("roles", &self.roles)
            .field("realm", &self.realm)
            .field("raw_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}
