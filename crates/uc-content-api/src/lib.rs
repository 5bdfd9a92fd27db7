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
use uc_core::cache::TtlCache;
use uc_core::matching::MatchOutcome;
use uc_core::rate_limit::RateLimiter;
use uc_core::store::{PgSourceStore, SourceStore};
use uc_core::{config, http, logging, metrics, server};
use utoipa::OpenApi;

mod content;

#[cfg(test)]
mod contract_tests;

pub use content::{ContentRequest, ContentResponse};

pub(crate) const SERVICE_NAME: &str = "uc-content-api";

#[derive(Clone)]
pub struct AppState {
    pub(crate) store: Arc<dyn SourceStore>,
    pub(crate) cache: TtlCache<MatchOutcome>,
    pub(crate) rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(store: Arc<dyn SourceStore>, cache_ttl: Duration, rate_per_minute: u64) -> Self {
        Self {
            store,
            cache: TtlCache::new(cache_ttl),
            rate_limiter: Arc::new(RateLimiter::per_minute(rate_per_minute)),
        }
    }
}

#[derive(Serialize, utoipa::ToSchema)]
struct HealthStatus {
    status: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(content::get_content, healthz),
    components(schemas(
        ContentRequest,
        ContentResponse,
        uc_core::source::Replacement,
        uc_core::api_error::ErrorResponse,
        HealthStatus
    )),
    tags((name = "content", description = "Personalized content lookup"))
)]
struct ApiDoc;

pub struct ContentApiConfig {
    pub addr: SocketAddr,
    pub database_url: String,
    pub cache_ttl_seconds: u64,
    pub rate_limit_per_minute: u64,
}

pub fn load_config() -> Result<ContentApiConfig> {
    let addr = config::socket_addr_from_env("CONTENT_API_ADDR", "0.0.0.0:8090")?;
    let database_url = config::required_env("DATABASE_URL")?;
    let cache_ttl_seconds = config::u64_from_env("CONTENT_CACHE_TTL_SECONDS", 300)?;
    let rate_limit_per_minute = config::u64_from_env("CONTENT_RATE_LIMIT_PER_MINUTE", 600)?;
    Ok(ContentApiConfig {
        addr,
        database_url,
        cache_ttl_seconds,
        rate_limit_per_minute,
    })
}

pub async fn run(config: ContentApiConfig) -> Result<()> {
    logging::init(SERVICE_NAME);
    metrics::init(SERVICE_NAME);

    let store = PgSourceStore::connect(&config.database_url, 10).await?;
    let state = AppState::new(
        Arc::new(store),
        Duration::from_secs(config.cache_ttl_seconds),
        config.rate_limit_per_minute,
    );
    if state.cache.is_enabled() {
        state.cache.spawn_purge(Duration::from_secs(60));
    }
    spawn_rate_limit_prune(Arc::clone(&state.rate_limiter));

    server::serve(SERVICE_NAME, config.addr, router(state)).await
}

pub fn router(state: AppState) -> Router {
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
        .route("/v1/openapi.json", get(openapi_json))
        .route("/v1/content", post(content::get_content))
        // path the embed script has always called
        .route("/functions/v1/get_content", post(content::get_content))
        .with_state(state);

    http::apply_standard_layers(router, SERVICE_NAME).layer(http::cors_layer())
}

fn spawn_rate_limit_prune(limiter: Arc<RateLimiter>) {
    if !limiter.is_enabled() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        loop {
            ticker.tick().await;
            limiter.prune().await;
        }
    });
}

#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Ready", body = HealthStatus),
        (status = 503, description = "Store unavailable", body = HealthStatus)
    )
)]
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
