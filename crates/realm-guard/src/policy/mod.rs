//! Per-route authorization policies.
//!
//! A route's policy is an ordered list of [`Guard`]s run by one executor
//! ([`RoutePolicy::run_guards`]). Each guard either hands the request on or
//! rejects it with a terminal [`AuthError`]. Authentication itself happens
//! earlier, in [`crate::middleware::require_auth`], so guards only read the
//! published [`AuthenticatedIdentity`].
//!
//! ```rust,ignore
//! Router::new()
//!     .route("/api/v1/me", with_realms(read_realms, get(me::get_me)))
//!     .route(
//!         "/api/v1/tests",
//!         with_validation_and_realm(schema, [teacher_realm], post(tests::create_test)),
//!     )
//! ```

pub mod schema;

use crate::auth::AuthenticatedIdentity;
use crate::errors::AuthError;
use crate::observability::metrics;
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::MethodRouter,
};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

pub use schema::{JsonKind, PayloadSchema, RequiredFields};

/// Largest request body the schema guard will buffer (1 MiB).
pub const MAX_VALIDATED_BODY_BYTES: usize = 1024 * 1024;

/// Realms allowed to reach a route. Immutable once attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationPolicy {
    required_realms: BTreeSet<String>,
}

impl AuthorizationPolicy {
    pub fn new<I, S>(realms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required_realms: realms.into_iter().map(Into::into).collect(),
        }
    }

    pub fn required_realms(&self) -> &BTreeSet<String> {
        &self.required_realms
    }

    pub fn allows(&self, realm: &str) -> bool {
        self.required_realms.contains(realm)
    }
}

/// JSON body that passed the route's schema guard.
#[derive(Debug, Clone)]
pub struct ValidatedPayload(pub Arc<Value>);

/// One step of a route's policy.
#[derive(Clone)]
pub enum Guard {
    /// Parse the body as JSON and validate it.
    Schema(Arc<dyn PayloadSchema>),
    /// Require the caller's realm to be one of the policy's realms.
    Realm(AuthorizationPolicy),
}

impl Guard {
    fn name(&self) -> &'static str {
        match self {
            Guard::Schema(_) => "schema",
            Guard::Realm(_) => "realm",
        }
    }

    async fn check(&self, req: Request) -> Result<Request, AuthError> {
        match self {
            Guard::Schema(schema) => check_schema(schema.as_ref(), req).await,
            Guard::Realm(policy) => check_realm(policy, req),
        }
    }
}

async fn check_schema(schema: &dyn PayloadSchema, req: Request) -> Result<Request, AuthError> {
    let (mut parts, body) = req.into_parts();

    let bytes = to_bytes(body, MAX_VALIDATED_BODY_BYTES).await.map_err(|e| {
        tracing::debug!(target: "rg.policy", error = %e, "Failed to read request body");
        AuthError::SchemaValidationFailure("request body could not be read".to_string())
    })?;

    let payload: Value = serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!(target: "rg.policy", error = %e, "Request body is not valid JSON");
        AuthError::SchemaValidationFailure("request body is not valid JSON".to_string())
    })?;

    schema.validate(&payload).map_err(|errors| {
        tracing::debug!(target: "rg.policy", violations = errors.len(), "Schema validation failed");
        AuthError::SchemaValidationFailure(errors.join(", "))
    })?;

    parts.extensions.insert(ValidatedPayload(Arc::new(payload)));
    Ok(Request::from_parts(parts, Body::from(bytes)))
}

fn check_realm(policy: &AuthorizationPolicy, req: Request) -> Result<Request, AuthError> {
    let Some(identity) = req.extensions().get::<AuthenticatedIdentity>() else {
        tracing::warn!(target: "rg.policy", "Realm guard reached without an authenticated identity");
        return Err(AuthError::MissingOrMalformedHeader);
    };

    if !policy.allows(identity.realm()) {
        tracing::debug!(
            target: "rg.policy",
            realm = %identity.realm(),
            required = ?policy.required_realms(),
            "Realm not permitted for route"
        );
        return Err(AuthError::RealmForbidden(identity.realm().to_string()));
    }

    Ok(req)
}

/// Ordered guard chain for one route.
#[derive(Clone)]
pub struct RoutePolicy {
    guards: Vec<Guard>,
}

impl RoutePolicy {
    /// Guards run in the given order.
    pub fn from_guards(guards: Vec<Guard>) -> Self {
        Self { guards }
    }

    pub fn realms(policy: AuthorizationPolicy) -> Self {
        Self::from_guards(vec![Guard::Realm(policy)])
    }

    /// Schema first, then realm.
    pub fn validated(schema: Arc<dyn PayloadSchema>, policy: AuthorizationPolicy) -> Self {
        Self::from_guards(vec![Guard::Schema(schema), Guard::Realm(policy)])
    }

    pub fn guard_names(&self) -> Vec<&'static str> {
        self.guards.iter().map(Guard::name).collect()
    }

    /// Run every guard in order, stopping at the first rejection.
    pub async fn run_guards(&self, mut req: Request) -> Result<Request, AuthError> {
        for guard in &self.guards {
            req = guard.check(req).await?;
        }
        Ok(req)
    }

    /// Wrap `route` so the policy runs before its handler.
    pub fn apply<S>(self, route: MethodRouter<S>) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        route.route_layer(middleware::from_fn_with_state(
            Arc::new(self),
            enforce_policy,
        ))
    }
}

async fn enforce_policy(
    State(policy): State<Arc<RoutePolicy>>,
    req: Request,
    next: Next,
) -> Response {
    match policy.run_guards(req).await {
        Ok(req) => {
            metrics::record_authorization_decision("allowed");
            next.run(req).await
        }
        Err(e) => {
            metrics::record_authorization_decision(e.error_type());
            e.into_response()
        }
    }
}

/// Allow only callers from `realm`.
pub fn with_realm<S>(realm: &str, route: MethodRouter<S>) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    RoutePolicy::realms(AuthorizationPolicy::new([realm])).apply(route)
}

/// Allow callers from any of `realms`.
pub fn with_realms<I, R, S>(realms: I, route: MethodRouter<S>) -> MethodRouter<S>
where
    I: IntoIterator<Item = R>,
    R: Into<String>,
    S: Clone + Send + Sync + 'static,
{
    RoutePolicy::realms(AuthorizationPolicy::new(realms)).apply(route)
}

/// Validate the JSON body against `schema`, then require one of `realms`.
///
/// A malformed payload is rejected with 400 before the realm is looked at.
pub fn with_validation_and_realm<I, R, S>(
    schema: Arc<dyn PayloadSchema>,
    realms: I,
    route: MethodRouter<S>,
) -> MethodRouter<S>
where
    I: IntoIterator<Item = R>,
    R: Into<String>,
    S: Clone + Send + Sync + 'static,
{
    RoutePolicy::validated(schema, AuthorizationPolicy::new(realms)).apply(route)
}
