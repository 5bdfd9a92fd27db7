use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use uc_core::auth::JwtConfig;
use uc_core::store::{PgSourceStore, SourceStore};
use uc_core::{config, http, logging, metrics, server};
use utoipa::OpenApi;

mod auth;
mod script;
mod sources;
mod status;


pub(crate) const SERVICE_NAME: &str = "uc-dashboard-api";

#[derive(Clone)]
pub struct AppState {
    pub(crate) store: Arc<dyn SourceStore>,
    pub(crate) jwt_config: JwtConfig,
    pub(crate) script_base_url: String,
    pub(crate) content_api_url: String,
    pub(crate) http_client: reqwest::Client,
}

impl AppState {
    pub fn new(
        store: Arc<dyn SourceStore>,
        jwt_config: JwtConfig,
        script_base_url: impl Into<String>,
        content_api_url: impl Into<String>,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            store,
            jwt_config,
            script_base_url: script_base_url.into(),
            content_api_url: content_api_url.into(),
            http_client,
        })
    }
}

#[derive(Serialize, utoipa::ToSchema)]
struct HealthStatus {
    status: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        sources::list_sources,
        sources::get_source,
        sources::create_source,
        sources::update_source,
        sources::delete_source,
        sources::test_source,
        script::get_script,
        status::content_status
    ),
    components(schemas(
        uc_core::source::Source,
        uc_core::source::SourceInput,
        uc_core::source::Replacement,
        uc_core::source::RuleType,
        uc_core::matching::TestOutcome,
        uc_core::api_error::ErrorResponse,
        sources::TestSourceRequest,
        sources::DeleteResponse,
        script::ScriptSnippet,
        status::ContentStatus,
        HealthStatus
    )),
    tags((name = "sources", description = "Personalization source management"))
)]
struct ApiDoc;

pub struct DashboardApiConfig {
    pub addr: SocketAddr,
    pub database_url: String,
    pub jwt_config: JwtConfig,
    pub script_base_url: String,
    pub content_api_url: String,
}

pub fn jwt_config_from_env() -> Result<JwtConfig> {
    Ok(JwtConfig {
        secret: config::required_env("JWT_SECRET")?,
        issuer: config::env_or("JWT_ISSUER", "unusual"),
        audience: config::env_or("JWT_AUDIENCE", "unusual-dashboard"),
    })
}

pub fn load_config() -> Result<DashboardApiConfig> {
    let addr = config::socket_addr_from_env("DASHBOARD_API_ADDR", "0.0.0.0:8091")?;
    let database_url = config::required_env("DATABASE_URL")?;
    let jwt_config = jwt_config_from_env()?;
    let script_base_url = config::env_or("PUBLIC_SCRIPT_BASE_URL", "http://localhost:8090");
    let content_api_url = config::env_or("CONTENT_API_URL", "http://localhost:8090");
    Ok(DashboardApiConfig {
        addr,
        database_url,
        jwt_config,
        script_base_url,
        content_api_url,
    })
}

pub async fn run(config: DashboardApiConfig) -> Result<()> {
    logging::init(SERVICE_NAME);
    metrics::init(SERVICE_NAME);

    let store = PgSourceStore::connect(&config.database_url, 10).await?;
    let state = AppState::new(
        Arc::new(store),
        config.jwt_config,
        config.script_base_url,
        config.content_api_url,
    )?;

    server::serve(SERVICE_NAME, config.addr, router(state)).await
}

pub fn router(state: AppState) -> Router {
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
        .route("/v1/openapi.json", get(openapi_json))
        .route(
            "/v1/sources",
            get(sources::list_sources).post(sources::create_source),
        )
        .route(
            "/v1/sources/:source_id",
            get(sources::get_source)
                .put(sources::update_source)
                .delete(sources::delete_source),
        )
        .route("/v1/sources/:source_id/test", post(sources::test_source))
        .route("/v1/script", get(script::get_script))
        .route("/v1/content-status", get(status::content_status))
        .with_state(state);

    http::apply_standard_layers(router, SERVICE_NAME).layer(http::cors_layer())
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.check_ready().await {
        Ok(_) => (StatusCode::OK, Json(HealthStatus { status: "ok".into() })),
        Err(err) => {
            tracing::warn!(error = %err, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthStatus {
                    status: "unavailable".into(),
                }),
            )
        }
    }
}

async fn metrics_endpoint() -> impl IntoResponse {
    metrics::metrics_response(SERVICE_NAME)
}

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
