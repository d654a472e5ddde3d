//! # Realm Guard Test Utilities
//!
//! This crate provides:
//! - Fixed RSA keypairs (`TestKeypair`)
//! - Access token claims builder (`TestTokenBuilder`)
//! - JWKS endpoint mocks on a `wiremock::MockServer` (`JwksMock`)
//! - Server test harness (`TestGuardServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use realm_guard_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let keypair = TestKeypair::primary("kid-1");
//!     let idp = JwksMock::start().await;
//!     idp.publish("teacher-realm", &[&keypair]).await;
//!
//!     let server = TestGuardServer::spawn(&idp.url()).await?;
//!     let token = keypair.sign(&TestTokenBuilder::new(&idp.url(), "teacher-realm").build());
//!     // ...
//!     Ok(())
//! }
//! ```

pub mod jwks_mock;
pub mod rsa_fixtures;
pub mod server_harness;
pub mod token_builders;

pub use jwks_mock::*;
pub use rsa_fixtures::*;
pub use server_harness::*;
pub use token_builders::*;
