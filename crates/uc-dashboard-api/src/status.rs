use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use uc_core::api_error::ApiResult;
use utoipa::ToSchema;

use crate::auth::require_user;
use crate::AppState;

const PROBE_REFERRER: &str = "https://example.com";
const PROBE_URL: &str = "https://example.com/?utm_source=status_check";

#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContentStatus {
    Ok {
        content_api_status: u16,
        content_api_response: Value,
    },
    Error {
        error: String,
    },
}

/// Sends a synthetic lookup for the calling user to the content API and
/// reports what came back. Transport failures become 502.
#[utoipa::path(
    get,
    path = "/v1/content-status",
    tag = "sources",
    responses(
        (status = 200, description = "Content API reachable", body = ContentStatus),
        (status = 401, description = "Missing or invalid bearer token", body = uc_core::api_error::ErrorResponse),
        (status = 502, description = "Content API unreachable", body = ContentStatus)
    )
)]
pub async fn content_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let user_id = require_user(&state, &headers)?;
    let endpoint = format!("{}/v1/content", state.content_api_url.trim_end_matches('/'));

    let result = state
        .http_client
        .post(&endpoint)
        .json(&json!({
            "user_id": user_id,
            "referrer": PROBE_REFERRER,
            "url": PROBE_URL,
        }))
        .send()
        .await;

    let response = match result {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(%endpoint, error = %err, "content api probe failed");
            return Ok(probe_error(err.to_string()));
        }
    };

    let status = response.status().as_u16();
    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => {
            tracing::warn!(%endpoint, error = %err, "content api probe body unreadable");
            return Ok(probe_error(err.to_string()));
        }
    };
    let content_api_response =
        serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body));

    tracing::info!(%endpoint, status, "content api probe completed");
    Ok((
        StatusCode::OK,
        Json(ContentStatus::Ok {
            content_api_status: status,
            content_api_response,
        }),
    )
        .into_response())
}

fn probe_error(error: String) -> Response {
    (StatusCode::BAD_GATEWAY, Json(ContentStatus::Error { error })).into_response()
}
