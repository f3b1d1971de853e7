//! Custom Axum extractors.

use crate::middleware::{CORRELATION_ID_HEADER, parse_correlation_id};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

/// Correlation ID for request tracing.
///
/// Prefers the id stored by [`correlation_id_layer`](crate::correlation_id_layer) so
/// that handler logs and the response header agree. Without the middleware it reads
/// `X-Correlation-ID` or generates a new UUID.
///
/// ```ignore
/// async fn pay(correlation_id: CorrelationId, ...) -> Result<Json<PaymentDocument>, AppError> {
///     tracing::info!(correlation_id = %correlation_id, "Processing payment");
///     ...
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .extensions
            .get::<Uuid>()
            .copied()
            .or_else(|| parse_correlation_id(parts.headers.get(CORRELATION_ID_HEADER)))
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(id))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code can use expect
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> CorrelationId {
        let (mut parts, ()) = request.into_parts();
        CorrelationId::from_request_parts(&mut parts, &())
            .await
            .expect("extraction is infallible")
    }

    #[tokio::test]
    async fn reads_the_header() {
        let id = Uuid::new_v4();
        let request = Request::builder()
            .header(CORRELATION_ID_HEADER, id.to_string())
            .body(())
            .expect("Valid request");

        assert_eq!(extract(request).await, CorrelationId(id));
    }

    #[tokio::test]
    async fn extension_wins_over_header() {
        let stored = Uuid::new_v4();
        let mut request = Request::builder()
            .header(CORRELATION_ID_HEADER, Uuid::new_v4().to_string())
            .body(())
            .expect("Valid request");
        request.extensions_mut().insert(stored);

        assert_eq!(extract(request).await, CorrelationId(stored));
    }

    #[tokio::test]
    async fn generates_when_absent() {
        let first = extract(Request::new(())).await;
        let second = extract(Request::new(())).await;
        assert_ne!(first, second);
    }
}
