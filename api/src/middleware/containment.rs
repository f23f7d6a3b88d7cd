//! Outermost failure containment.
//!
//! Handler-level failures are `AppError` values that already render the
//! uniform envelope. This covers the remainder, anything that panics, so a
//! single failing concern can never tear down the request.

use std::any::Any;

use axum::body::Body;
use axum::http::{header, Response, StatusCode};
use axum::response::IntoResponse;

use parlab_core::envelope::ApiEnvelope;

/// Panic responder for `CatchPanicLayer::custom`. Infallible by
/// construction.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "request handler panicked");

    let envelope = ApiEnvelope::error(
        StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        "Internal server error",
        serde_json::json!({}),
    );
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_string(&envelope).unwrap_or_default(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_panic_yields_the_500_envelope() {
        let response = panic_response(Box::new("boom".to_string()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn str_and_opaque_panics_are_handled_too() {
        assert_eq!(
            panic_response(Box::new("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            panic_response(Box::new(42_u32)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
