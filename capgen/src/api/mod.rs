//! HTTP API: submission, status, cancellation and health.

pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiServerConfig, AppState};
