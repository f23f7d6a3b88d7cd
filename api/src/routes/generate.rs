//! The generation pipeline: one POST endpoint that authenticates the caller,
//! resolves a calibration, calls the upstream provider, scores the reply,
//! persists the experiment, and emits the audit trail.
//!
//! Terminal on the first unrecoverable failure. Everything after a
//! successful persist (analytics aggregation, completion audit events) is
//! non-fatal by contract.

use std::time::Instant;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

use parlab_core::audit::{new_correlation_id, AuditEventType, AuditSource};
use parlab_core::calibration::Calibration;
use parlab_core::envelope::ApiEnvelope;
use parlab_core::experiment::{Experiment, GenerationResponse};
use parlab_core::metrics::{score_response, ResponseMetrics};
use parlab_core::params::EffectiveParameters;

use crate::audit::IdentityCell;
use crate::auth;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::llm::{call_with_retry, finalize_text, HttpBackend, ProviderRequest, RetryPolicy};
use crate::routes::calibrations::resolve_calibration;
use crate::routes::experiments::{ExperimentRow, EXPERIMENT_COLUMNS};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/generate", post(generate))
}

/// Body of POST /v1/generate.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub prompt: String,
    /// Specific calibration to run against; defaults to the most recent.
    #[serde(default)]
    pub calibration_id: Option<Uuid>,
    /// Explicit parameters override the calibration midpoints.
    #[serde(default)]
    pub parameters: Option<EffectiveParameters>,
}

/// Generate one response for a prompt and persist it as an experiment.
#[utoipa::path(
    post,
    path = "/v1/generate",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "Experiment generated", body = ApiEnvelope),
        (status = 400, description = "Bad input or no calibration", body = ApiEnvelope),
        (status = 401, description = "Not authenticated", body = ApiEnvelope),
        (status = 429, description = "Rate limited", body = ApiEnvelope),
        (status = 500, description = "Configuration or persistence failure", body = ApiEnvelope),
        (status = 502, description = "Upstream provider failure", body = ApiEnvelope)
    ),
    security(("bearer_auth" = [])),
    tag = "generation"
)]
pub async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppJson(req): AppJson<GenerateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let total_start = Instant::now();

    // Config check precedes all I/O.
    let llm_config = state.config.llm()?.clone();
    state.config.auth()?;

    // Filled right after authentication; audit events fired before then get
    // the logger's delayed retry.
    let identity = IdentityCell::empty();

    let user = auth::authenticate(&state, &headers).await?;
    identity.set(user.id);

    if req.prompt.trim().is_empty() {
        return Err(AppError::Validation {
            message: "Prompt is required".to_string(),
            field: Some("prompt".to_string()),
        });
    }

    // Resolved once; persistence below reuses this record.
    let calibration = resolve_calibration(&state.db, user.id, req.calibration_id)
        .await?
        .ok_or_else(|| AppError::Validation {
            message: "No calibration found. Please complete calibration first.".to_string(),
            field: Some("calibrationId".to_string()),
        })?;

    let parameters = req
        .parameters
        .unwrap_or_else(|| EffectiveParameters::from_ranges(&calibration.ranges));

    let correlation_id = new_correlation_id();
    state
        .audit
        .record(
            &identity,
            AuditEventType::LlmStreamStarted,
            &correlation_id,
            json!({ "calibration_id": calibration.id }),
            AuditSource::Server,
        )
        .await;

    let backend = HttpBackend::new(state.http.clone(), &llm_config);
    let provider_request = ProviderRequest {
        model: llm_config.model.clone(),
        prompt: req.prompt.clone(),
        parameters,
    };

    let llm_start = Instant::now();
    let raw_text = match call_with_retry(&backend, &provider_request, &RetryPolicy::default()).await
    {
        Ok(text) => text,
        Err(e) => {
            state
                .audit
                .record(
                    &identity,
                    AuditEventType::LlmRequestError,
                    &correlation_id,
                    json!({ "error": e.to_string() }),
                    AuditSource::Server,
                )
                .await;
            return Err(e.into());
        }
    };
    let latency_ms = llm_start.elapsed().as_millis() as u64;

    let text = finalize_text(raw_text, &llm_config.model);
    let metrics = score_response(&text);

    let response = GenerationResponse {
        id: Uuid::now_v7(),
        text: text.clone(),
        parameters,
        metrics,
        timestamp: Utc::now().timestamp_millis(),
        prompt: req.prompt.clone(),
        latency_ms,
    };

    let experiment =
        insert_experiment(&state.db, user.id, &calibration, &req.prompt, &response).await?;

    // Rolling summary; the experiment is already persisted, so a failed
    // upsert only loses the aggregate.
    if let Err(e) = upsert_analytics(&state.db, user.id, calibration.id, &metrics).await {
        tracing::warn!(error = ?e, user_id = %user.id, "analytics summary upsert failed");
    }

    state
        .audit
        .record(
            &identity,
            AuditEventType::ExperimentGenerated,
            &correlation_id,
            json!({
                "experiment_id": experiment.id,
                "calibration_id": calibration.id,
                "latency_ms": latency_ms,
                "tokens_used": parameters.max_tokens,
                "model": llm_config.model,
            }),
            AuditSource::Server,
        )
        .await;

    let total_latency_ms = total_start.elapsed().as_millis() as u64;
    state
        .audit
        .record(
            &identity,
            AuditEventType::LlmStreamCompleted,
            &correlation_id,
            json!({ "total_latency_ms": total_latency_ms }),
            AuditSource::Server,
        )
        .await;

    Ok(Json(ApiEnvelope::ok(
        "Experiment generated successfully",
        json!({
            "experiment": experiment,
            "response": text,
            "metrics": metrics,
            "latency_ms": latency_ms,
            "total_latency_ms": total_latency_ms,
        }),
    )))
}

/// Insert the experiment with its single response. A failure here is
/// terminal and not retried; the caller resubmits.
async fn insert_experiment(
    pool: &PgPool,
    user_id: Uuid,
    calibration: &Calibration,
    prompt: &str,
    response: &GenerationResponse,
) -> Result<Experiment, AppError> {
    let parameters_json = serde_json::to_value(response.parameters)
        .map_err(|e| AppError::Internal(format!("failed to serialize parameters: {e}")))?;
    let responses_json = serde_json::to_value(vec![response.clone()])
        .map_err(|e| AppError::Internal(format!("failed to serialize responses: {e}")))?;

    let row = sqlx::query_as::<_, ExperimentRow>(&format!(
        "INSERT INTO experiments \
         (id, user_id, calibration_id, prompt, parameters, responses, saved, discarded) \
         VALUES ($1, $2, $3, $4, $5, $6, TRUE, FALSE) \
         RETURNING {EXPERIMENT_COLUMNS}"
    ))
    .bind(Uuid::now_v7())
    .bind(user_id)
    .bind(calibration.id)
    .bind(prompt)
    .bind(&parameters_json)
    .bind(&responses_json)
    .fetch_one(pool)
    .await
    .map_err(|e| AppError::Persistence {
        message: "Failed to save experiment".to_string(),
        detail: e.to_string(),
    })?;

    row.into_experiment()
}

async fn upsert_analytics(
    pool: &PgPool,
    user_id: Uuid,
    calibration_id: Uuid,
    metrics: &ResponseMetrics,
) -> Result<(), AppError> {
    let metrics_json = serde_json::to_value(metrics)
        .map_err(|e| AppError::Internal(format!("failed to serialize metrics: {e}")))?;

    sqlx::query(
        "INSERT INTO analytics_summaries (id, user_id, calibration_id, metrics_summary) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (user_id, calibration_id) \
         DO UPDATE SET metrics_summary = EXCLUDED.metrics_summary, updated_at = now()",
    )
    .bind(Uuid::now_v7())
    .bind(user_id)
    .bind(calibration_id)
    .bind(&metrics_json)
    .execute(pool)
    .await?;

    Ok(())
}
