use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use uc_core::api_error::{ApiError, ApiResult};
use uc_core::{auth, metrics};
use uuid::Uuid;

use crate::{AppState, SERVICE_NAME};

const AUTHENTICATE_BEARER_CHALLENGE: &str = r#"Bearer realm="uc-dashboard-api""#;

/// Resolves the calling user from the bearer token. The token subject is
/// the owner id every source query is scoped to.
#[allow(clippy::result_large_err)]
pub(crate) fn require_user(state: &AppState, headers: &HeaderMap) -> ApiResult<Uuid> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| auth_required_error("missing token"))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| auth_required_error("invalid token"))?;
    auth::verify_token(token.trim(), &state.jwt_config).map_err(|err| {
        metrics::inc_auth_failure(SERVICE_NAME);
        tracing::debug!(error = %err, "bearer token rejected");
        auth_required_error("token is not valid")
    })
}

fn auth_required_error(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::UNAUTHORIZED, "AUTH_REQUIRED", message)
        .with_header("www-authenticate", AUTHENTICATE_BEARER_CHALLENGE)
}
