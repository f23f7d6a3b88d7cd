//! Per-caller rate limiting in front of the generation handler.
//!
//! Not a strict sliding window: the counter resets in one jump when the
//! window expires, so callers near a boundary can briefly exceed the average
//! rate. Known, accepted imprecision; see the tests.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service, ServiceExt};

use parlab_core::envelope::ApiEnvelope;

pub const WINDOW: Duration = Duration::from_secs(60);
pub const REQUEST_LIMIT: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited,
}

struct WindowEntry {
    count: u32,
    window_start: Instant,
}

/// Injected counter store: caller key → requests in the current window.
pub struct WindowStore {
    entries: Mutex<HashMap<String, WindowEntry>>,
    window: Duration,
    limit: u32,
}

impl WindowStore {
    pub fn new(window: Duration, limit: u32) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            window,
            limit,
        }
    }

    /// Count one request at `now` and decide. The clock is an argument so
    /// tests can drive it.
    pub fn check(&self, key: &str, now: Instant) -> RateDecision {
        let mut entries = self.entries.lock().expect("rate limit lock poisoned");
        let entry = entries.entry(key.to_string()).or_insert(WindowEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) > self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;
        if entry.count > self.limit {
            RateDecision::Limited
        } else {
            RateDecision::Allowed
        }
    }
}

/// Tower layer gating the wrapped routes behind a shared `WindowStore`.
#[derive(Clone)]
pub struct RateLimitLayer {
    store: Arc<WindowStore>,
}

impl RateLimitLayer {
    pub fn new(store: Arc<WindowStore>) -> Self {
        Self { store }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            store: self.store.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    store: Arc<WindowStore>,
}

impl<S> Service<Request> for RateLimitService<S>
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
        let store = self.store.clone();

        Box::pin(async move {
            let key = caller_key(&req);
            if store.check(&key, Instant::now()) == RateDecision::Limited {
                tracing::warn!(caller = %key, "rate limit exceeded");
                return Ok(limited_response());
            }
            Ok(ready.oneshot(req).await.into_response())
        })
    }
}

/// Caller identity: forwarded address, else one shared "unknown" bucket.
fn caller_key(req: &Request) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn limited_response() -> Response {
    let envelope = ApiEnvelope::error(
        StatusCode::TOO_MANY_REQUESTS.as_u16(),
        "Rate limit exceeded. Please wait before retrying.",
        serde_json::json!({}),
    );
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_string(&envelope).unwrap_or_default(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn limit_rejects_the_thirty_first_request() {
        let store = WindowStore::new(WINDOW, REQUEST_LIMIT);
        let now = Instant::now();

        for _ in 0..30 {
            assert_eq!(store.check("1.2.3.4", now), RateDecision::Allowed);
        }
        assert_eq!(store.check("1.2.3.4", now), RateDecision::Limited);
    }

    #[test]
    fn a_fresh_window_admits_again() {
        let store = WindowStore::new(WINDOW, REQUEST_LIMIT);
        let now = Instant::now();

        for _ in 0..31 {
            store.check("1.2.3.4", now);
        }
        assert_eq!(
            store.check("1.2.3.4", now + Duration::from_secs(61)),
            RateDecision::Allowed
        );
    }

    #[test]
    fn callers_are_counted_independently() {
        let store = WindowStore::new(WINDOW, 2);
        let now = Instant::now();

        assert_eq!(store.check("a", now), RateDecision::Allowed);
        assert_eq!(store.check("a", now), RateDecision::Allowed);
        assert_eq!(store.check("a", now), RateDecision::Limited);
        assert_eq!(store.check("b", now), RateDecision::Allowed);
    }

    // The window resets in one jump rather than sliding: a caller can burn a
    // full allowance just before the boundary and a fresh one just after,
    // briefly doubling the average rate. Accepted for this use case.
    #[test]
    fn window_reset_permits_a_boundary_burst() {
        let store = WindowStore::new(WINDOW, REQUEST_LIMIT);
        let start = Instant::now();

        for _ in 0..30 {
            assert_eq!(
                store.check("1.2.3.4", start + Duration::from_secs(59)),
                RateDecision::Allowed
            );
        }
        for _ in 0..30 {
            assert_eq!(
                store.check("1.2.3.4", start + Duration::from_secs(121)),
                RateDecision::Allowed
            );
        }
    }

    #[test]
    fn missing_forwarded_header_shares_the_unknown_bucket() {
        let req = Request::builder()
            .uri("/v1/generate")
            .body(Body::empty())
            .expect("request builds");
        assert_eq!(caller_key(&req), "unknown");

        let req = Request::builder()
            .uri("/v1/generate")
            .header("x-forwarded-for", "10.0.0.7")
            .body(Body::empty())
            .expect("request builds");
        assert_eq!(caller_key(&req), "10.0.0.7");
    }
}
