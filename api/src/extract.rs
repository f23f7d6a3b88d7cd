//! Custom extractors that convert axum rejections into the uniform envelope.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::Json;

use crate::error::AppError;

/// Drop-in replacement for `axum::Json<T>` in handler signatures.
/// Deserialization failures become a 400 envelope instead of axum's
/// plain-text rejection.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(AppError::Validation {
                message: format!("Invalid request body: {}", rejection.body_text()),
                field: None,
            }),
        }
    }
}
