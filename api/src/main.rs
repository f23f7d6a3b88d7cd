use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod audit;
mod auth;
mod config;
mod error;
mod extract;
mod llm;
mod middleware;
mod routes;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "parlab API",
        version = "0.1.0",
        description = "Generation pipeline for the parlab parameter-exploration console: \
                       calibration-driven LLM calls with scoring, persistence, and audit."
    ),
    paths(
        routes::health::health_check,
        routes::generate::generate,
        routes::calibrations::create_calibration,
        routes::calibrations::list_calibrations,
        routes::calibrations::delete_calibration,
        routes::experiments::list_experiments,
        routes::experiments::update_experiment,
        routes::experiments::delete_experiment,
    ),
    components(schemas(
        routes::health::HealthResponse,
        routes::generate::GenerateRequest,
        routes::calibrations::CreateCalibrationRequest,
        routes::experiments::UpdateExperimentRequest,
        parlab_core::envelope::ApiEnvelope,
        parlab_core::calibration::Calibration,
        parlab_core::calibration::CalibrationAnswer,
        parlab_core::calibration::AnswerValue,
        parlab_core::calibration::CalibrationMode,
        parlab_core::calibration::Range,
        parlab_core::calibration::ParameterRanges,
        parlab_core::params::EffectiveParameters,
        parlab_core::metrics::ResponseMetrics,
        parlab_core::experiment::Experiment,
        parlab_core::experiment::GenerationResponse,
        parlab_core::audit::AuditEventType,
        parlab_core::audit::AuditSource,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlab_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Arc::new(config::Config::from_env());

    // Elevated storage credential; the identity service gets only the anon key.
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to database");

    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let app_state = state::AppState {
        db: pool.clone(),
        config: config.clone(),
        audit: Arc::new(audit::AuditLogger::new(pool.clone())),
        http: reqwest::Client::new(),
    };

    let limiter = Arc::new(middleware::rate_limit::WindowStore::new(
        middleware::rate_limit::WINDOW,
        middleware::rate_limit::REQUEST_LIMIT,
    ));

    let cors_layer = middleware::cors::build_cors_layer();

    // Chain per request: containment → telemetry → rate limit → handler.
    // Only the generation route sits behind the limiter.
    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(
            routes::generate::router()
                .layer(middleware::rate_limit::RateLimitLayer::new(limiter)),
        )
        .merge(routes::calibrations::router())
        .merge(routes::experiments::router())
        .layer(middleware::telemetry::TelemetryLayer::new(pool.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::custom(
                    middleware::containment::panic_response,
                ))
                .layer(cors_layer),
        )
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("parlab API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app).await.expect("Server error");
}
