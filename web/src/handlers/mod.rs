//! Shared HTTP handlers.

pub mod health;

pub use health::{HealthResponse, Liveness, health_check, readiness_response};
