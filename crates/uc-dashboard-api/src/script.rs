use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use uc_core::api_error::ApiResult;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::require_user;
use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct ScriptSnippet {
    pub script_url: String,
    pub embed_code: String,
    pub webflow_instructions: String,
}

impl ScriptSnippet {
    pub fn build(base_url: &str, user_id: Uuid) -> Self {
        let script_url = format!(
            "{}/scripts/unusual.js?user_id={user_id}",
            base_url.trim_end_matches('/')
        );
        let embed_code = format!("<script src=\"{script_url}\"></script>");
        let webflow_instructions = format!(
            "1. In your Webflow project, go to \"Project Settings\" (cog icon).\n\
             2. Navigate to the \"Custom Code\" tab.\n\
             3. Paste the following code in the \"Before </body> tag\" section:\n\n\
             {embed_code}\n\n\
             4. Save your changes and publish your site."
        );
        Self {
            script_url,
            embed_code,
            webflow_instructions,
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/script",
    tag = "sources",
    responses(
        (status = 200, description = "Embed snippet for the calling user", body = ScriptSnippet),
        (status = 401, description = "Missing or invalid bearer token", body = uc_core::api_error::ErrorResponse)
    )
)]
pub async fn get_script(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ScriptSnippet>> {
    let user_id = require_user(&state, &headers)?;
    Ok(Json(ScriptSnippet::build(&state.script_base_url, user_id)))
}
