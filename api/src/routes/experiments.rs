use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use parlab_core::audit::{new_correlation_id, AuditEventType, AuditSource};
use parlab_core::envelope::ApiEnvelope;
use parlab_core::experiment::Experiment;

use crate::audit::IdentityCell;
use crate::auth;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/experiments", get(list_experiments))
        .route(
            "/v1/experiments/{id}",
            axum::routing::patch(update_experiment).delete(delete_experiment),
        )
}

pub(crate) const EXPERIMENT_COLUMNS: &str =
    "id, user_id, calibration_id, prompt, parameters, responses, saved, discarded, created_at";

#[derive(sqlx::FromRow)]
pub(crate) struct ExperimentRow {
    id: Uuid,
    user_id: Uuid,
    calibration_id: Option<Uuid>,
    prompt: String,
    parameters: serde_json::Value,
    responses: serde_json::Value,
    saved: bool,
    discarded: bool,
    created_at: DateTime<Utc>,
}

impl ExperimentRow {
    pub(crate) fn into_experiment(self) -> Result<Experiment, AppError> {
        let parameters = serde_json::from_value(self.parameters)
            .map_err(|e| AppError::Internal(format!("malformed experiment parameters: {e}")))?;
        let responses = serde_json::from_value(self.responses)
            .map_err(|e| AppError::Internal(format!("malformed experiment responses: {e}")))?;

        Ok(Experiment {
            id: self.id,
            user_id: self.user_id,
            calibration_id: self.calibration_id,
            prompt: self.prompt,
            parameters,
            responses,
            saved: self.saved,
            discarded: self.discarded,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ListExperimentsQuery {
    /// Restrict to experiments generated against one calibration.
    pub calibration_id: Option<Uuid>,
}

/// List the caller's experiments, newest first.
#[utoipa::path(
    get,
    path = "/v1/experiments",
    params(ListExperimentsQuery),
    responses(
        (status = 200, description = "Experiments", body = ApiEnvelope),
        (status = 401, description = "Not authenticated", body = ApiEnvelope)
    ),
    security(("bearer_auth" = [])),
    tag = "experiments"
)]
pub async fn list_experiments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListExperimentsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user = auth::authenticate(&state, &headers).await?;

    let rows = match query.calibration_id {
        Some(calibration_id) => {
            sqlx::query_as::<_, ExperimentRow>(&format!(
                "SELECT {EXPERIMENT_COLUMNS} FROM experiments \
                 WHERE user_id = $1 AND calibration_id = $2 ORDER BY created_at DESC"
            ))
            .bind(user.id)
            .bind(calibration_id)
            .fetch_all(&state.db)
            .await?
        }
        None => {
            sqlx::query_as::<_, ExperimentRow>(&format!(
                "SELECT {EXPERIMENT_COLUMNS} FROM experiments \
                 WHERE user_id = $1 ORDER BY created_at DESC"
            ))
            .bind(user.id)
            .fetch_all(&state.db)
            .await?
        }
    };

    let experiments = rows
        .into_iter()
        .map(ExperimentRow::into_experiment)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(ApiEnvelope::ok(
        "OK",
        json!({ "experiments": experiments }),
    )))
}

/// Body of PATCH /v1/experiments/{id}. `saved` and `discarded` are the only
/// fields mutable after creation.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateExperimentRequest {
    pub saved: Option<bool>,
    pub discarded: Option<bool>,
}

/// Flag an experiment as saved or discarded from the dashboard.
#[utoipa::path(
    patch,
    path = "/v1/experiments/{id}",
    params(("id" = Uuid, Path, description = "Experiment id")),
    request_body = UpdateExperimentRequest,
    responses(
        (status = 200, description = "Experiment updated", body = ApiEnvelope),
        (status = 400, description = "Validation error or unknown experiment", body = ApiEnvelope),
        (status = 401, description = "Not authenticated", body = ApiEnvelope)
    ),
    security(("bearer_auth" = [])),
    tag = "experiments"
)]
pub async fn update_experiment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    AppJson(req): AppJson<UpdateExperimentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = auth::authenticate(&state, &headers).await?;

    if req.saved.is_none() && req.discarded.is_none() {
        return Err(AppError::Validation {
            message: "Provide saved and/or discarded".to_string(),
            field: None,
        });
    }

    let row = sqlx::query_as::<_, ExperimentRow>(&format!(
        "UPDATE experiments \
         SET saved = COALESCE($3, saved), discarded = COALESCE($4, discarded) \
         WHERE id = $1 AND user_id = $2 \
         RETURNING {EXPERIMENT_COLUMNS}"
    ))
    .bind(id)
    .bind(user.id)
    .bind(req.saved)
    .bind(req.discarded)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::Validation {
        message: "Experiment not found".to_string(),
        field: Some("id".to_string()),
    })?;

    let experiment = row.into_experiment()?;

    let identity = IdentityCell::known(user.id);
    state
        .audit
        .record(
            &identity,
            AuditEventType::ExperimentUpdated,
            &new_correlation_id(),
            json!({ "experiment_id": id, "saved": experiment.saved, "discarded": experiment.discarded }),
            AuditSource::Server,
        )
        .await;

    Ok(Json(ApiEnvelope::ok(
        "Experiment updated",
        json!({ "experiment": experiment }),
    )))
}

/// Delete one of the caller's experiments.
#[utoipa::path(
    delete,
    path = "/v1/experiments/{id}",
    params(("id" = Uuid, Path, description = "Experiment id")),
    responses(
        (status = 200, description = "Experiment deleted", body = ApiEnvelope),
        (status = 401, description = "Not authenticated", body = ApiEnvelope)
    ),
    security(("bearer_auth" = [])),
    tag = "experiments"
)]
pub async fn delete_experiment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user = auth::authenticate(&state, &headers).await?;

    sqlx::query("DELETE FROM experiments WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user.id)
        .execute(&state.db)
        .await?;

    let identity = IdentityCell::known(user.id);
    state
        .audit
        .record(
            &identity,
            AuditEventType::ExperimentDeleted,
            &new_correlation_id(),
            json!({ "experiment_id": id }),
            AuditSource::Server,
        )
        .await;

    Ok(Json(ApiEnvelope::ok(
        "Experiment deleted",
        json!({ "id": id }),
    )))
}
