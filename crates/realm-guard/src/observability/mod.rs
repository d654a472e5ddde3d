//! Observability for Realm Guard.
//!
//! Provides metrics definitions and the HTTP metrics middleware.

pub mod metrics;
