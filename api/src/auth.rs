use std::time::Duration;

use axum::http::HeaderMap;
use serde::Deserialize;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::AppError;
use crate::state::AppState;

const IDENTITY_TIMEOUT: Duration = Duration::from_secs(10);

/// The caller, as vouched for by the identity service.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// Extract the bearer token from the `Authorization` header.
pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get("authorization")
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?;
    let value = value
        .to_str()
        .map_err(|_| AppError::Auth("Authorization header must be valid UTF-8".to_string()))?;

    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            AppError::Auth("Authorization header must use Bearer scheme".to_string())
        })
}

/// Client for the identity service. Carries only the low-privilege anon key;
/// the caller's own bearer token does the vouching. Data access never goes
/// through this client.
#[derive(Clone)]
pub struct IdentityClient {
    client: reqwest::Client,
    api_url: String,
    anon_key: String,
}

impl IdentityClient {
    pub fn new(client: reqwest::Client, config: &AuthConfig) -> Self {
        Self {
            client,
            api_url: config.api_url.clone(),
            anon_key: config.anon_key.clone(),
        }
    }

    /// Resolve a bearer token to a user. Any failure (unreachable service,
    /// rejected token, malformed body) is a 401 to the caller.
    pub async fn resolve_user(&self, bearer: &str) -> Result<AuthenticatedUser, AppError> {
        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.api_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
            .timeout(IDENTITY_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "identity service unreachable");
                AppError::Auth("Not authenticated".to_string())
            })?;

        if !response.status().is_success() {
            return Err(AppError::Auth("Not authenticated".to_string()));
        }

        let user = response.json::<AuthenticatedUser>().await.map_err(|e| {
            tracing::warn!(error = %e, "identity service returned malformed user");
            AppError::Auth("Not authenticated".to_string())
        })?;

        tracing::debug!(
            user_id = %user.id,
            email = user.email.as_deref().unwrap_or("-"),
            "resolved caller identity"
        );
        Ok(user)
    }
}

/// Handler-side authentication: config check, bearer extraction, identity
/// lookup. Runs before any storage or upstream access.
pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<AuthenticatedUser, AppError> {
    let auth_config = state.config.auth()?;
    let bearer = extract_bearer(headers)?;
    IdentityClient::new(state.http.clone(), auth_config)
        .resolve_user(bearer)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn missing_header_is_an_auth_error() {
        let headers = HeaderMap::new();
        let err = extract_bearer(&headers).expect_err("missing header must fail");
        assert!(matches!(err, AppError::Auth(_)));
    }

    #[test]
    fn non_bearer_scheme_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic Zm9v"));
        let err = extract_bearer(&headers).expect_err("basic auth must fail");
        assert!(matches!(err, AppError::Auth(_)));
    }

    #[test]
    fn empty_bearer_token_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer   "));
        let err = extract_bearer(&headers).expect_err("empty token must fail");
        assert!(matches!(err, AppError::Auth(_)));
    }

    #[test]
    fn valid_bearer_token_is_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer tok-123"));
        assert_eq!(extract_bearer(&headers).unwrap(), "tok-123");
    }
}
