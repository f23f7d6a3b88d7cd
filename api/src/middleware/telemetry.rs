//! Request latency/status capture.
//!
//! Appends one row to `system_metrics` per API request. The insert runs on
//! its own task: it can never block, fail, or reorder the response.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service, ServiceExt};

#[derive(Clone)]
pub struct TelemetryLayer {
    pool: sqlx::PgPool,
}

impl TelemetryLayer {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

impl<S> Layer<S> for TelemetryLayer {
    type Service = TelemetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TelemetryService {
            inner,
            pool: self.pool.clone(),
        }
    }
}

#[derive(Clone)]
pub struct TelemetryService<S> {
    inner: S,
    pool: sqlx::PgPool,
}

impl<S> Service<Request> for TelemetryService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);
        let pool = self.pool.clone();

        Box::pin(async move {
            let path = req.uri().path().to_owned();
            if !is_tracked(&path) {
                return Ok(ready.oneshot(req).await.into_response());
            }

            let method = req.method().to_string();
            let start = Instant::now();

            let response = ready.oneshot(req).await.into_response();

            let status = response.status().as_u16() as i16;
            let latency_ms = start.elapsed().as_millis().min(i32::MAX as u128) as i32;

            tokio::spawn(async move {
                if let Err(e) = sqlx::query(
                    "INSERT INTO system_metrics (path, method, latency_ms, status) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(&path)
                .bind(&method)
                .bind(latency_ms)
                .bind(status)
                .execute(&pool)
                .await
                {
                    tracing::warn!(error = %e, "failed to insert telemetry record");
                }
            });

            Ok(response)
        })
    }
}

/// Swagger assets and unknown paths are not worth a metrics row.
fn is_tracked(path: &str) -> bool {
    path.starts_with("/v1/") || path == "/health"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_paths_are_tracked() {
        assert!(is_tracked("/v1/generate"));
        assert!(is_tracked("/v1/experiments"));
        assert!(is_tracked("/health"));
    }

    #[test]
    fn swagger_and_unknown_paths_are_not() {
        assert!(!is_tracked("/swagger-ui"));
        assert!(!is_tracked("/api-doc/openapi.json"));
        assert!(!is_tracked("/favicon.ico"));
    }
}
