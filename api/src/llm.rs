//! Upstream text-generation provider client.
//!
//! One streaming POST per attempt. Rate limits back off linearly
//! (`base_delay * (attempt + 1)`) and network-level failures retry
//! immediately, both up to the policy ceiling; any other provider status is
//! terminal. The decoder concatenates body chunks as they arrive, which
//! covers chunked streams and single-shot bodies alike.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::json;

use parlab_core::params::EffectiveParameters;

use crate::config::LlmConfig;

/// One upstream generation request.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    pub prompt: String,
    pub parameters: EffectiveParameters,
}

/// How an upstream attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("upstream rate limited")]
    RateLimited,
    #[error("upstream returned status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error calling upstream: {0}")]
    Network(String),
}

/// Transport seam for the generation call. The HTTP implementation decodes
/// the streamed body into the final text; tests substitute scripted mocks.
pub trait GenerationBackend: Send + Sync {
    fn generate<'a>(
        &'a self,
        request: &'a ProviderRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, BackendError>> + Send + 'a>>;
}

/// Retry schedule for transient upstream failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_retries: 2,
        }
    }
}

/// Call the provider under the retry policy. Returns the decoded text or the
/// last error once the ceiling is exhausted.
pub async fn call_with_retry<B: GenerationBackend>(
    backend: &B,
    request: &ProviderRequest,
    policy: &RetryPolicy,
) -> Result<String, BackendError> {
    let mut attempt: u32 = 0;
    loop {
        match backend.generate(request).await {
            Ok(text) => return Ok(text),
            Err(BackendError::RateLimited) if attempt < policy.max_retries => {
                tracing::warn!(attempt = attempt + 1, "upstream rate limited, backing off");
                tokio::time::sleep(policy.base_delay * (attempt + 1)).await;
            }
            Err(BackendError::Network(ref e)) if attempt < policy.max_retries => {
                tracing::warn!(attempt = attempt + 1, error = %e, "upstream network error, retrying");
            }
            Err(other) => return Err(other),
        }
        attempt += 1;
    }
}

/// Empty upstream text gets a fixed placeholder so metric computation never
/// sees a zero-length response.
pub fn finalize_text(raw: String, model: &str) -> String {
    if raw.trim().is_empty() {
        format!("No text returned by model \"{model}\".")
    } else {
        raw
    }
}

/// reqwest-backed provider client.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(client: reqwest::Client, config: &LlmConfig) -> Self {
        Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
        }
    }
}

impl GenerationBackend for HttpBackend {
    fn generate<'a>(
        &'a self,
        request: &'a ProviderRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, BackendError>> + Send + 'a>> {
        Box::pin(async move {
            let body = json!({
                "model": request.model,
                "messages": [{ "role": "user", "content": request.prompt }],
                "temperature": request.parameters.temperature,
                "top_p": request.parameters.top_p,
                "max_tokens": request.parameters.max_tokens,
                "frequency_penalty": request.parameters.frequency_penalty,
                "stream": true,
            });

            let response = self
                .client
                .post(&self.api_url)
                .header("Content-Type", "application/json")
                .bearer_auth(&self.api_key)
                .json(&body)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| BackendError::Network(e.to_string()))?;

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(BackendError::RateLimited);
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(BackendError::Http {
                    status: status.as_u16(),
                    body,
                });
            }

            decode_body(response).await
        })
    }
}

async fn decode_body(mut response: reqwest::Response) -> Result<String, BackendError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| BackendError::Network(e.to_string()))?
    {
        bytes.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::*;
    use parlab_core::calibration::{ParameterRanges, Range};

    /// Pops one scripted outcome per call; rate-limits once the script runs
    /// dry. Counts every attempt.
    struct ScriptedBackend {
        calls: AtomicU32,
        script: Mutex<VecDeque<Result<String, BackendError>>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<String, BackendError>>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                script: Mutex::new(script.into_iter().collect()),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl GenerationBackend for ScriptedBackend {
        fn generate<'a>(
            &'a self,
            _request: &'a ProviderRequest,
        ) -> Pin<Box<dyn Future<Output = Result<String, BackendError>> + Send + 'a>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.script
                    .lock()
                    .expect("script lock poisoned")
                    .pop_front()
                    .unwrap_or(Err(BackendError::RateLimited))
            })
        }
    }

    fn request() -> ProviderRequest {
        let ranges = ParameterRanges {
            temperature: Range::new(0.4, 0.8),
            top_p: Range::new(0.7, 0.9),
            max_tokens: Range::new(500.0, 1500.0),
            frequency_penalty: Range::new(0.0, 0.3),
        };
        ProviderRequest {
            model: "gpt-4o-mini".to_string(),
            prompt: "Explain entropy".to_string(),
            parameters: EffectiveParameters::from_ranges(&ranges),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_retries: 2,
        }
    }

    #[tokio::test]
    async fn persistent_rate_limit_stops_after_three_attempts() {
        let backend = ScriptedBackend::new(vec![]);

        let err = call_with_retry(&backend, &request(), &fast_policy())
            .await
            .expect_err("exhausted retries must fail");
        assert!(matches!(err, BackendError::RateLimited));
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn non_rate_limit_status_is_terminal_on_first_attempt() {
        let backend = ScriptedBackend::new(vec![Err(BackendError::Http {
            status: 500,
            body: "boom".to_string(),
        })]);

        let err = call_with_retry(&backend, &request(), &fast_policy())
            .await
            .expect_err("5xx must not be retried");
        assert!(matches!(err, BackendError::Http { status: 500, .. }));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn network_errors_retry_up_to_the_ceiling() {
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::Network("connection reset".to_string())),
            Err(BackendError::Network("connection reset".to_string())),
            Ok("recovered".to_string()),
        ]);

        let text = call_with_retry(&backend, &request(), &fast_policy())
            .await
            .expect("third attempt succeeds");
        assert_eq!(text, "recovered");
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn rate_limit_then_success_recovers() {
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::RateLimited),
            Ok("after backoff".to_string()),
        ]);

        let text = call_with_retry(&backend, &request(), &fast_policy())
            .await
            .expect("second attempt succeeds");
        assert_eq!(text, "after backoff");
        assert_eq!(backend.calls(), 2);
    }

    #[test]
    fn empty_text_becomes_the_model_placeholder() {
        assert_eq!(
            finalize_text(String::new(), "gpt-4o-mini"),
            "No text returned by model \"gpt-4o-mini\"."
        );
        assert_eq!(
            finalize_text("   \n".to_string(), "gpt-4o-mini"),
            "No text returned by model \"gpt-4o-mini\"."
        );
    }

    #[test]
    fn non_empty_text_is_untouched() {
        assert_eq!(
            finalize_text("Entropy measures disorder.".to_string(), "gpt-4o-mini"),
            "Entropy measures disorder."
        );
    }

    #[test]
    fn placeholder_text_always_scores_at_least_one_word() {
        let text = finalize_text(String::new(), "gpt-4o-mini");
        let metrics = parlab_core::metrics::score_response(&text);
        assert!(metrics.length >= 1);
    }
}
