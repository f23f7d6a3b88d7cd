use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Domain events recorded on the audit trail. Write-once; the pipeline never
/// reads them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    LlmStreamStarted,
    LlmStreamCompleted,
    LlmRequestError,
    ExperimentGenerated,
    ExperimentUpdated,
    ExperimentDeleted,
    CalibrationCompleted,
    CalibrationDeleted,
    AnalyticsUpdated,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::LlmStreamStarted => "llm_stream_started",
            AuditEventType::LlmStreamCompleted => "llm_stream_completed",
            AuditEventType::LlmRequestError => "llm_request_error",
            AuditEventType::ExperimentGenerated => "experiment_generated",
            AuditEventType::ExperimentUpdated => "experiment_updated",
            AuditEventType::ExperimentDeleted => "experiment_deleted",
            AuditEventType::CalibrationCompleted => "calibration_completed",
            AuditEventType::CalibrationDeleted => "calibration_deleted",
            AuditEventType::AnalyticsUpdated => "analytics_updated",
        }
    }
}

/// Whether the event originated in the browser client or this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuditSource {
    Client,
    Server,
}

impl AuditSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSource::Client => "client",
            AuditSource::Server => "server",
        }
    }
}

/// Opaque token linking every audit event of one logical request.
/// Format: `<epoch-millis>-<8 random alphanumerics>`.
pub fn new_correlation_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!(
        "{}-{}",
        Utc::now().timestamp_millis(),
        suffix.to_lowercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_id_has_timestamp_and_suffix() {
        let id = new_correlation_id();
        let (millis, suffix) = id
            .split_once('-')
            .expect("correlation id must contain a separator");
        millis.parse::<i64>().expect("prefix must be epoch millis");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn correlation_ids_are_distinct() {
        assert_ne!(new_correlation_id(), new_correlation_id());
    }

    #[test]
    fn event_type_serializes_snake_case() {
        let json = serde_json::to_string(&AuditEventType::LlmStreamStarted).unwrap();
        assert_eq!(json, r#""llm_stream_started""#);
        assert_eq!(
            AuditEventType::LlmStreamStarted.as_str(),
            "llm_stream_started"
        );
    }
}
