use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::metrics::ResponseMetrics;
use crate::params::EffectiveParameters;

/// One synthesized reply. Created after a successful upstream call and
/// immutable thereafter; stored inside the owning experiment's `responses`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResponse {
    pub id: Uuid,
    pub text: String,
    pub parameters: EffectiveParameters,
    pub metrics: ResponseMetrics,
    /// Epoch milliseconds at creation time.
    pub timestamp: i64,
    pub prompt: String,
    /// Upstream call latency, retries and stream decode included.
    pub latency_ms: u64,
}

/// The persisted record of one prompt and its generated response(s).
/// `saved` and `discarded` are the only fields mutated after creation, by
/// the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub calibration_id: Option<Uuid>,
    pub prompt: String,
    pub parameters: EffectiveParameters,
    pub responses: Vec<GenerationResponse>,
    pub saved: bool,
    pub discarded: bool,
    pub created_at: DateTime<Utc>,
}
