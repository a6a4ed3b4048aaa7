//! service-core: Shared infrastructure for the payment services.
pub mod config;
pub mod error;
pub mod http;
pub mod middleware;
pub mod observability;
