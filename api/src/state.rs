use std::sync::Arc;

use sqlx::PgPool;

use crate::audit::AuditLogger;
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub audit: Arc<AuditLogger>,
    /// Shared outbound HTTP client, used for identity checks and upstream
    /// provider calls (per-request timeouts applied at the call site).
    pub http: reqwest::Client,
}
