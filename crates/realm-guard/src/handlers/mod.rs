//! HTTP request handlers for Realm Guard.

pub mod assessments;
pub mod health;
pub mod me;
pub mod metrics;

pub use assessments::{create_test, create_test_schema};
pub use health::{health_check, readiness_check};
pub use me::get_me;
pub use metrics::metrics_handler;
