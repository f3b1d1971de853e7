//! Axum integration for Restbucks.
//!
//! Handlers stay thin: they extract input, build an action or call the repository,
//! and map the outcome to a response. This crate holds the pieces every handler
//! shares:
//!
//! - [`AppError`]: the error type handlers return, rendered as JSON
//! - [`CorrelationId`] and [`correlation_id_layer`]: request correlation
//! - [`handlers::health`]: liveness and readiness endpoints
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use restbucks_web::{correlation_id_layer, handlers::health_check};
//!
//! let app = Router::new()
//!     .route("/health", get(health_check))
//!     .layer(correlation_id_layer());
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

pub use error::AppError;
pub use extractors::CorrelationId;
pub use middleware::{CORRELATION_ID_HEADER, CorrelationIdExt, correlation_id_layer};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
