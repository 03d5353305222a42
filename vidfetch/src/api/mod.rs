//! REST API server module.
//!
//! Provides HTTP endpoints for analyzing media URLs and managing download jobs.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
