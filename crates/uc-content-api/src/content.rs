use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use uc_core::api_error::{ApiError, ApiResult};
use uc_core::matching::{self, MatchOutcome, RequestContext};
use uc_core::metrics;
use uc_core::rate_limit::RateDecision;
use uc_core::source::Replacement;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{AppState, SERVICE_NAME};

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ContentRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ContentResponse {
    pub replacements: Vec<Replacement>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<Uuid>,
}

impl From<MatchOutcome> for ContentResponse {
    fn from(outcome: MatchOutcome) -> Self {
        Self {
            replacements: outcome.replacements,
            success: true,
            source_id: outcome.source_id,
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/content",
    tag = "content",
    request_body = ContentRequest,
    responses(
        (status = 200, description = "Replacements of the first matching source, or none", body = ContentResponse),
        (status = 400, description = "Missing or invalid user_id / body", body = uc_core::api_error::ErrorResponse),
        (status = 415, description = "Body is not JSON", body = uc_core::api_error::ErrorResponse),
        (status = 429, description = "Rate limited", body = uc_core::api_error::ErrorResponse)
    )
)]
pub async fn get_content(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    payload: Result<Json<ContentRequest>, JsonRejection>,
) -> ApiResult<Json<ContentResponse>> {
    if let Some(ConnectInfo(peer)) = connect_info {
        enforce_rate_limit(&state, peer.ip()).await?;
    }

    let Json(request) = payload.map_err(json_rejection)?;
    let user_id = parse_user_id(request.user_id.as_deref())?;
    let referrer = request.referrer.as_deref();
    let url = request.url.as_deref();

    tracing::debug!(
        %user_id,
        referrer = referrer.map(|value| truncate(value, 50)).unwrap_or("null"),
        url = url.map(|value| truncate(value, 50)).unwrap_or("null"),
        "content lookup"
    );

    let key = cache_key(user_id, referrer, url);
    if let Some(outcome) = state.cache.get(&key).await {
        metrics::inc_content_cache(SERVICE_NAME, metrics::CACHE_RESULT_HIT);
        return Ok(Json(outcome.into()));
    }
    if state.cache.is_enabled() {
        metrics::inc_content_cache(SERVICE_NAME, metrics::CACHE_RESULT_MISS);
    }

    let sources = state.store.active_sources_for_user(user_id).await?;
    let ctx = RequestContext::new(referrer, url);
    let outcome = matching::resolve(&sources, &ctx);

    match outcome.source_id {
        Some(source_id) => {
            metrics::inc_content_match(SERVICE_NAME, metrics::MATCH_RESULT_MATCHED);
            tracing::info!(
                %user_id,
                %source_id,
                replacements = outcome.replacements.len(),
                "source matched"
            );
        }
        None => {
            metrics::inc_content_match(SERVICE_NAME, metrics::MATCH_RESULT_EMPTY);
            tracing::debug!(%user_id, candidates = sources.len(), "no source matched");
        }
    }

    state.cache.insert(key, outcome.clone()).await;
    Ok(Json(outcome.into()))
}

/// Rejects before any store access: a blank id is "required", anything that
/// is not a UUID is "invalid".
#[allow(clippy::result_large_err)]
pub(crate) fn parse_user_id(raw: Option<&str>) -> ApiResult<Uuid> {
    let raw = raw
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::bad_request("USER_ID_REQUIRED", "User ID is required"))?;
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request("INVALID_USER_ID", "Invalid user ID"))
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => ApiError::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "UNSUPPORTED_MEDIA_TYPE",
            "Content-Type must be application/json",
        ),
        other => ApiError::bad_request("INVALID_JSON", "Invalid JSON payload")
            .with_details(serde_json::Value::String(other.body_text())),
    }
}

/// Fields are length-prefixed so no referrer/url split can collide with
/// another.
fn cache_key(user_id: Uuid, referrer: Option<&str>, url: Option<&str>) -> String {
    let referrer = referrer.unwrap_or_default();
    let url = url.unwrap_or_default();
    format!("{user_id}:{}:{referrer}:{}:{url}", referrer.len(), url.len())
}

async fn enforce_rate_limit(state: &AppState, client: IpAddr) -> ApiResult<()> {
    match state.rate_limiter.check(client).await {
        RateDecision::Allowed { .. } => Ok(()),
        RateDecision::Limited { retry_after } => {
            metrics::inc_rate_limited(SERVICE_NAME);
            Err(
                ApiError::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", "rate limited")
                    .with_header("retry-after", retry_after.as_secs().max(1).to_string()),
            )
        }
    }
}

fn truncate(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}
