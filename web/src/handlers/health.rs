//! Health endpoints for load balancers and orchestrators.
//!
//! - `GET /health`: liveness, never touches dependencies
//! - `GET /health/ready`: readiness, built from a [`HealthReport`] of the stores

use axum::{Json, http::StatusCode};
use chrono::{DateTime, Utc};
use restbucks_runtime::{HealthCheck, HealthReport, HealthStatus};
use serde::Serialize;
use std::collections::BTreeMap;

/// Body of the liveness probe.
#[derive(Debug, Serialize)]
pub struct Liveness {
    /// Always `"ok"`
    pub status: &'static str,
}

/// Liveness probe.
///
/// ```text
/// GET /health  ->  200 {"status":"ok"}
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> Json<Liveness> {
    Json(Liveness { status: "ok" })
}

/// JSON body of the readiness probe.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: `healthy`, `degraded` or `unhealthy`
    pub status: String,
    /// One entry per component
    pub checks: Vec<ComponentHealth>,
    /// When the report was built
    pub timestamp: DateTime<Utc>,
}

/// Health of a single component.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// Component name
    pub component: String,
    /// Component status
    pub status: String,
    /// Details when not healthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Extra diagnostics
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl From<HealthCheck> for ComponentHealth {
    fn from(check: HealthCheck) -> Self {
        Self {
            component: check.component,
            status: check.status.to_string(),
            message: check.message,
            metadata: check.metadata.into_iter().collect(),
        }
    }
}

/// Turn a report into a readiness response.
///
/// Healthy and degraded answer 200; unhealthy answers 503 so that traffic is drained.
#[must_use]
pub fn readiness_response(report: HealthReport) -> (StatusCode, Json<HealthResponse>) {
    let status = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let body = HealthResponse {
        status: report.status.to_string(),
        checks: report.checks.into_iter().map(ComponentHealth::from).collect(),
        timestamp: report.timestamp,
    };

    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let Json(body) = health_check().await;
        assert_eq!(
            serde_json::to_value(body).unwrap_or_default(),
            serde_json::json!({ "status": "ok" })
        );
    }

    #[test]
    fn degraded_components_stay_ready() {
        let report = HealthReport::new(vec![
            HealthCheck::healthy("payment"),
            HealthCheck::degraded("processor", "dlq half full").with_metadata("dlq_size", "600"),
        ]);

        let (status, Json(body)) = readiness_response(report);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "degraded");
        assert_eq!(body.checks[1].metadata["dlq_size"], "600");
    }

    #[test]
    fn unhealthy_components_are_not_ready() {
        let report = HealthReport::new(vec![HealthCheck::unhealthy("processor", "shutting down")]);

        let (status, Json(body)) = readiness_response(report);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.checks[0].message.as_deref(), Some("shutting down"));
    }
}
