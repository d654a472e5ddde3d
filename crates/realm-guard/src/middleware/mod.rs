//! Middleware for Realm Guard.
//!
//! # Components
//!
//! - `auth` - bearer token authentication and the public-path allow-list

pub mod auth;

pub use auth::{require_auth, AuthState, PublicPaths};
