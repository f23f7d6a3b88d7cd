use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

use parlab_core::audit::{new_correlation_id, AuditEventType, AuditSource};
use parlab_core::calibration::{
    Calibration, CalibrationAnswer, CalibrationMode, ParameterRanges, Range,
};
use parlab_core::derive::{calibration_insights, derive_parameter_ranges};
use parlab_core::envelope::ApiEnvelope;

use crate::audit::IdentityCell;
use crate::auth;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/calibrations",
            get(list_calibrations).post(create_calibration),
        )
        .route("/v1/calibrations/{id}", delete(delete_calibration))
}

const CALIBRATION_COLUMNS: &str = "id, user_id, mode, answers, \
     temperature_min, temperature_max, top_p_min, top_p_max, \
     max_tokens_min, max_tokens_max, frequency_penalty_min, frequency_penalty_max, \
     insights, created_at";

#[derive(sqlx::FromRow)]
pub(crate) struct CalibrationRow {
    id: Uuid,
    user_id: Uuid,
    mode: String,
    answers: serde_json::Value,
    temperature_min: f64,
    temperature_max: f64,
    top_p_min: f64,
    top_p_max: f64,
    max_tokens_min: i32,
    max_tokens_max: i32,
    frequency_penalty_min: f64,
    frequency_penalty_max: f64,
    insights: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl CalibrationRow {
    pub(crate) fn into_calibration(self) -> Calibration {
        let mode = match self.mode.as_str() {
            "deep" => CalibrationMode::Deep,
            _ => CalibrationMode::Quick,
        };
        Calibration {
            id: self.id,
            user_id: self.user_id,
            mode,
            answers: serde_json::from_value(self.answers).unwrap_or_default(),
            ranges: ParameterRanges {
                temperature: Range::new(self.temperature_min, self.temperature_max),
                top_p: Range::new(self.top_p_min, self.top_p_max),
                max_tokens: Range::new(self.max_tokens_min as f64, self.max_tokens_max as f64),
                frequency_penalty: Range::new(
                    self.frequency_penalty_min,
                    self.frequency_penalty_max,
                ),
            },
            insights: serde_json::from_value(self.insights).unwrap_or_default(),
            created_at: self.created_at,
        }
    }
}

/// Fetch the calibration a generation request should run against: the
/// requested id scoped to the user when given, otherwise (or on a miss) the
/// user's most recent one.
pub(crate) async fn resolve_calibration(
    pool: &PgPool,
    user_id: Uuid,
    calibration_id: Option<Uuid>,
) -> Result<Option<Calibration>, AppError> {
    if let Some(id) = calibration_id {
        let row = sqlx::query_as::<_, CalibrationRow>(&format!(
            "SELECT {CALIBRATION_COLUMNS} FROM calibrations WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        if let Some(row) = row {
            return Ok(Some(row.into_calibration()));
        }
    }

    let row = sqlx::query_as::<_, CalibrationRow>(&format!(
        "SELECT {CALIBRATION_COLUMNS} FROM calibrations \
         WHERE user_id = $1 ORDER BY created_at DESC LIMIT 1"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(CalibrationRow::into_calibration))
}

/// Body of POST /v1/calibrations.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCalibrationRequest {
    pub mode: CalibrationMode,
    pub answers: Vec<CalibrationAnswer>,
}

/// Derive parameter ranges from quiz answers and store the calibration.
#[utoipa::path(
    post,
    path = "/v1/calibrations",
    request_body = CreateCalibrationRequest,
    responses(
        (status = 201, description = "Calibration saved", body = ApiEnvelope),
        (status = 400, description = "Validation error", body = ApiEnvelope),
        (status = 401, description = "Not authenticated", body = ApiEnvelope)
    ),
    security(("bearer_auth" = [])),
    tag = "calibrations"
)]
pub async fn create_calibration(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppJson(req): AppJson<CreateCalibrationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = auth::authenticate(&state, &headers).await?;

    if req.answers.is_empty() {
        return Err(AppError::Validation {
            message: "answers must not be empty".to_string(),
            field: Some("answers".to_string()),
        });
    }

    let ranges = derive_parameter_ranges(&req.answers);
    ranges
        .validate()
        .map_err(|e| AppError::Internal(format!("derived invalid ranges: {e}")))?;
    let insights = calibration_insights(&req.answers);

    let answers_json = serde_json::to_value(&req.answers)
        .map_err(|e| AppError::Internal(format!("failed to serialize answers: {e}")))?;
    let insights_json = serde_json::to_value(&insights)
        .map_err(|e| AppError::Internal(format!("failed to serialize insights: {e}")))?;

    let row = sqlx::query_as::<_, CalibrationRow>(&format!(
        "INSERT INTO calibrations \
         (id, user_id, mode, answers, temperature_min, temperature_max, \
          top_p_min, top_p_max, max_tokens_min, max_tokens_max, \
          frequency_penalty_min, frequency_penalty_max, insights) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
         RETURNING {CALIBRATION_COLUMNS}"
    ))
    .bind(Uuid::now_v7())
    .bind(user.id)
    .bind(req.mode.as_str())
    .bind(&answers_json)
    .bind(ranges.temperature.min)
    .bind(ranges.temperature.max)
    .bind(ranges.top_p.min)
    .bind(ranges.top_p.max)
    .bind(ranges.max_tokens.min as i32)
    .bind(ranges.max_tokens.max as i32)
    .bind(ranges.frequency_penalty.min)
    .bind(ranges.frequency_penalty.max)
    .bind(&insights_json)
    .fetch_one(&state.db)
    .await?;

    let calibration = row.into_calibration();

    let identity = IdentityCell::known(user.id);
    state
        .audit
        .record(
            &identity,
            AuditEventType::CalibrationCompleted,
            &new_correlation_id(),
            json!({ "calibration_id": calibration.id, "mode": calibration.mode.as_str() }),
            AuditSource::Server,
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(ApiEnvelope::created(
            "Calibration saved",
            json!({ "calibration": calibration }),
        )),
    ))
}

/// List the caller's calibrations, newest first.
#[utoipa::path(
    get,
    path = "/v1/calibrations",
    responses(
        (status = 200, description = "Calibrations", body = ApiEnvelope),
        (status = 401, description = "Not authenticated", body = ApiEnvelope)
    ),
    security(("bearer_auth" = [])),
    tag = "calibrations"
)]
pub async fn list_calibrations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let user = auth::authenticate(&state, &headers).await?;

    let rows = sqlx::query_as::<_, CalibrationRow>(&format!(
        "SELECT {CALIBRATION_COLUMNS} FROM calibrations \
         WHERE user_id = $1 ORDER BY created_at DESC"
    ))
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    let calibrations: Vec<Calibration> = rows
        .into_iter()
        .map(CalibrationRow::into_calibration)
        .collect();

    Ok(Json(ApiEnvelope::ok(
        "OK",
        json!({ "calibrations": calibrations }),
    )))
}

/// Delete one of the caller's calibrations. Experiments keep their rows;
/// their calibration reference is nulled by the schema.
#[utoipa::path(
    delete,
    path = "/v1/calibrations/{id}",
    params(("id" = Uuid, Path, description = "Calibration id")),
    responses(
        (status = 200, description = "Calibration deleted", body = ApiEnvelope),
        (status = 401, description = "Not authenticated", body = ApiEnvelope)
    ),
    security(("bearer_auth" = [])),
    tag = "calibrations"
)]
pub async fn delete_calibration(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user = auth::authenticate(&state, &headers).await?;

    sqlx::query("DELETE FROM calibrations WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user.id)
        .execute(&state.db)
        .await?;

    let identity = IdentityCell::known(user.id);
    state
        .audit
        .record(
            &identity,
            AuditEventType::CalibrationDeleted,
            &new_correlation_id(),
            json!({ "calibration_id": id }),
            AuditSource::Server,
        )
        .await;

    Ok(Json(ApiEnvelope::ok(
        "Calibration deleted",
        json!({ "id": id }),
    )))
}
