use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use uc_core::api_error::{ApiError, ApiResult};
use uc_core::matching::{self, RequestContext, TestOutcome};
use uc_core::source::{NormalizedSource, Source, SourceInput};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::require_user;
use crate::AppState;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TestSourceRequest {
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteResponse {
    pub message: &'static str,
}

#[utoipa::path(
    get,
    path = "/v1/sources",
    tag = "sources",
    responses(
        (status = 200, description = "Sources in evaluation order", body = [Source]),
        (status = 401, description = "Missing or invalid bearer token", body = uc_core::api_error::ErrorResponse)
    )
)]
pub async fn list_sources(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Source>>> {
    let user_id = require_user(&state, &headers)?;
    let sources = state.store.list_sources(user_id).await?;
    Ok(Json(sources))
}

#[utoipa::path(
    get,
    path = "/v1/sources/{source_id}",
    tag = "sources",
    params(("source_id" = String, Path, description = "Source id")),
    responses(
        (status = 200, description = "The source", body = Source),
        (status = 404, description = "No such source for this user", body = uc_core::api_error::ErrorResponse)
    )
)]
pub async fn get_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(source_id): Path<String>,
) -> ApiResult<Json<Source>> {
    let user_id = require_user(&state, &headers)?;
    let source_id = parse_source_id(&source_id)?;
    let source = state.store.get_source(user_id, source_id).await?;
    Ok(Json(source))
}

#[utoipa::path(
    post,
    path = "/v1/sources",
    tag = "sources",
    request_body = SourceInput,
    responses(
        (status = 201, description = "Created", body = Source),
        (status = 400, description = "Validation failed", body = uc_core::api_error::ErrorResponse)
    )
)]
pub async fn create_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SourceInput>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Source>)> {
    let user_id = require_user(&state, &headers)?;
    let input = normalize_payload(payload)?;

    let source = state.store.create_source(user_id, input).await?;
    tracing::info!(
        %user_id,
        source_id = %source.source_id,
        rule_type = %source.rule_type,
        priority = source.priority,
        "source created"
    );
    Ok((StatusCode::CREATED, Json(source)))
}

#[utoipa::path(
    put,
    path = "/v1/sources/{source_id}",
    tag = "sources",
    params(("source_id" = String, Path, description = "Source id")),
    request_body = SourceInput,
    responses(
        (status = 200, description = "Updated", body = Source),
        (status = 400, description = "Validation failed", body = uc_core::api_error::ErrorResponse),
        (status = 404, description = "No such source for this user", body = uc_core::api_error::ErrorResponse)
    )
)]
pub async fn update_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(source_id): Path<String>,
    payload: Result<Json<SourceInput>, JsonRejection>,
) -> ApiResult<Json<Source>> {
    let user_id = require_user(&state, &headers)?;
    let source_id = parse_source_id(&source_id)?;
    let input = normalize_payload(payload)?;

    let source = state.store.update_source(user_id, source_id, input).await?;
    tracing::info!(%user_id, %source_id, "source updated");
    Ok(Json(source))
}

#[utoipa::path(
    delete,
    path = "/v1/sources/{source_id}",
    tag = "sources",
    params(("source_id" = String, Path, description = "Source id")),
    responses(
        (status = 200, description = "Removed", body = DeleteResponse),
        (status = 404, description = "No such source for this user", body = uc_core::api_error::ErrorResponse)
    )
)]
pub async fn delete_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(source_id): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    let user_id = require_user(&state, &headers)?;
    let source_id = parse_source_id(&source_id)?;

    state.store.delete_source(user_id, source_id).await?;
    tracing::info!(%user_id, %source_id, "source removed");
    Ok(Json(DeleteResponse {
        message: "Source removed",
    }))
}

#[utoipa::path(
    post,
    path = "/v1/sources/{source_id}/test",
    tag = "sources",
    params(("source_id" = String, Path, description = "Source id")),
    request_body = TestSourceRequest,
    responses(
        (status = 200, description = "Whether the source would match", body = TestOutcome),
        (status = 404, description = "No such source for this user", body = uc_core::api_error::ErrorResponse)
    )
)]
pub async fn test_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(source_id): Path<String>,
    payload: Result<Json<TestSourceRequest>, JsonRejection>,
) -> ApiResult<Json<TestOutcome>> {
    let user_id = require_user(&state, &headers)?;
    let source_id = parse_source_id(&source_id)?;
    let Json(request) = payload.map_err(|rejection| {
        ApiError::bad_request("INVALID_JSON", rejection.body_text())
    })?;

    let source = state.store.get_source(user_id, source_id).await?;
    let ctx = RequestContext::new(request.referrer.as_deref(), request.url.as_deref());
    Ok(Json(matching::explain(&source, &ctx)))
}

/// Ids that are not UUIDs cannot exist, so they read as "not found".
#[allow(clippy::result_large_err)]
fn parse_source_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::not_found("source not found"))
}

#[allow(clippy::result_large_err)]
fn normalize_payload(
    payload: Result<Json<SourceInput>, JsonRejection>,
) -> ApiResult<NormalizedSource> {
    let Json(input) = payload.map_err(|rejection| match rejection {
        JsonRejection::MissingJsonContentType(_) => ApiError::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "UNSUPPORTED_MEDIA_TYPE",
            "Content-Type must be application/json",
        ),
        other => ApiError::bad_request("INVALID_SOURCE", other.body_text()),
    })?;
    input
        .normalize()
        .map_err(|err| ApiError::bad_request("INVALID_SOURCE", err.to_string()))
}
