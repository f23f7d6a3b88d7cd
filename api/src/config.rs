use std::time::Duration;

use crate::error::AppError;

pub const DEFAULT_LLM_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;

/// Identity-service credentials. The anon key is the low-privilege
/// credential used only to resolve bearer tokens; all data access goes
/// through the elevated `DATABASE_URL` connection instead.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub api_url: String,
    pub anon_key: String,
}

/// Upstream text-generation provider settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    /// Caller-visible bound on one upstream attempt, separate from retry
    /// backoff. Exceeding it counts as a network-level failure.
    pub timeout: Duration,
}

/// Environment configuration. `DATABASE_URL` is read at startup in `main`
/// (the process is useless without its pool); the identity and provider
/// settings are optional here and checked per-request so that an incomplete
/// deployment serves 500 envelopes instead of crash-looping.
#[derive(Debug, Clone)]
pub struct Config {
    auth: Option<AuthConfig>,
    llm: Option<LlmConfig>,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        let auth = match (env("AUTH_API_URL"), env("AUTH_ANON_KEY")) {
            (Some(api_url), Some(anon_key)) => Some(AuthConfig {
                api_url: api_url.trim_end_matches('/').to_string(),
                anon_key,
            }),
            _ => None,
        };

        let llm = env("LLM_API_KEY").map(|api_key| {
            let api_url = env("LLM_API_URL")
                .and_then(|raw| match url::Url::parse(&raw) {
                    Ok(_) => Some(raw),
                    Err(e) => {
                        tracing::warn!(error = %e, "invalid LLM_API_URL, using default");
                        None
                    }
                })
                .unwrap_or_else(|| DEFAULT_LLM_API_URL.to_string());

            LlmConfig {
                api_key,
                api_url,
                model: env("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
                timeout: Duration::from_secs(
                    env("LLM_TIMEOUT_SECS")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(DEFAULT_LLM_TIMEOUT_SECS),
                ),
            }
        });

        let port = env("PORT").and_then(|p| p.parse().ok()).unwrap_or(3000);

        Self { auth, llm, port }
    }

    /// Identity-service settings, or the config-error envelope.
    pub fn auth(&self) -> Result<&AuthConfig, AppError> {
        self.auth
            .as_ref()
            .ok_or_else(|| AppError::Config("Server configuration error".to_string()))
    }

    /// Upstream provider settings, or the config-error envelope.
    pub fn llm(&self) -> Result<&LlmConfig, AppError> {
        self.llm.as_ref().ok_or_else(|| {
            AppError::Config("Missing LLM API key. Check environment variables.".to_string())
        })
    }
}

fn env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
