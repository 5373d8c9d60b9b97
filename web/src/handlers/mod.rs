//! HTTP request handlers.

pub mod health;
pub mod proxy;

pub use health::{health_check, readiness};
pub use proxy::proxy;
