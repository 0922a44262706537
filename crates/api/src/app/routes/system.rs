use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::app::{errors, services::AppServices};
use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    match services.queries.status(principal.account_id()).await {
        Ok(status) => Json(serde_json::json!({
            "accountId": principal.account_id().to_string(),
            "role": status.role.as_str(),
            "unlimited": status.unlimited,
        }))
        .into_response(),
        Err(e) => errors::query_error_to_response(e),
    }
}
