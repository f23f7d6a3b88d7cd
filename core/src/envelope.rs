use serde::Serialize;
use utoipa::ToSchema;

/// Uniform response envelope. Every pipeline response, success or failure,
/// renders exactly this shape.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiEnvelope {
    pub success: bool,
    pub status: u16,
    pub message: String,
    pub data: serde_json::Value,
}

impl ApiEnvelope {
    pub fn ok(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            status: 200,
            message: message.into(),
            data,
        }
    }

    pub fn created(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            status: 201,
            message: message.into(),
            data,
        }
    }

    pub fn error(status: u16, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: false,
            status,
            message: message.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_shape() {
        let envelope = ApiEnvelope::error(429, "Rate limit exceeded", serde_json::json!({}));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["status"], 429);
        assert_eq!(value["message"], "Rate limit exceeded");
        assert_eq!(value["data"], serde_json::json!({}));
    }

    #[test]
    fn ok_envelope_carries_data() {
        let envelope = ApiEnvelope::ok("OK", serde_json::json!({"latency_ms": 12}));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["data"]["latency_ms"], 12);
    }
}
