//! # Liveness API
//!
//! HTTP endpoints reporting KMS provider health and reload status.

pub mod handlers;
pub mod routes;
pub mod server;

pub use routes::{build_router, LivenessState};
pub use server::start_liveness_server;
