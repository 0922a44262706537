use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    response::{IntoResponse, Sse, sse::Event as SseEvent},
    routing::get,
};

use crate::app::services::{self, AppServices};
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(status))
        .route("/ledger", get(ledger))
        .route("/export", get(export))
}

/// GET /account - balance, usage and block state of the caller
pub async fn status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    match services.queries.status(principal.account_id()).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => errors::query_error_to_response(e),
    }
}

/// GET /account/ledger?since=
pub async fn ledger(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::ListQuery>,
) -> axum::response::Response {
    match services.queries.ledger(principal.account_id(), query.since).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => errors::query_error_to_response(e),
    }
}

pub async fn export(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    match services.queries.export(principal.account_id()).await {
        Ok(export) => Json(export).into_response(),
        Err(e) => errors::query_error_to_response(e),
    }
}

/// GET /notices - server-sent stream of the caller's notices
pub async fn notices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    services::notice_sse_stream(services, principal.account_id())
}
