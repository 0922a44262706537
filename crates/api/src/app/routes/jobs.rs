use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use tracing::info;

use creditgate_core::JobId;
use creditgate_infra::dispatcher::DispatchRequest;

use crate::app::routes::common::{client_ip, parse_id};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(request_job).get(list_jobs))
        .route("/stats", get(job_stats))
        .route("/:id", get(get_job))
        .route("/:id/await", get(await_job))
}

/// POST /jobs - debit one credit and enqueue a completion job
pub async fn request_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Json(body): Json<dto::RequestJobBody>,
) -> axum::response::Response {
    let mut request = DispatchRequest::new(principal.account_id(), body.payload);
    if let Some(business_id) = body.business_id {
        request = request.with_business(business_id);
    }
    if let Some(ip) = client_ip(&headers) {
        request = request.with_client_ip(ip);
    }

    match services.dispatcher.request_job(request).await {
        Ok(receipt) => {
            info!(account_id = %principal.account_id(), job_id = %receipt.job_id, "job accepted");
            (StatusCode::CREATED, Json(receipt)).into_response()
        }
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// GET /jobs - most recent jobs of the caller
pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::ListQuery>,
) -> axum::response::Response {
    match services.queries.jobs(principal.account_id(), query.limit).await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => errors::query_error_to_response(e),
    }
}

pub async fn job_stats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    match services.queries.job_stats(principal.account_id()).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => errors::query_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match parse_id(&id, "job id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.queries.job(principal.account_id(), job_id).await {
        Ok(job) => Json(dto::job_to_json(&job)).into_response(),
        Err(e) => errors::query_error_to_response(e),
    }
}

/// GET /jobs/:id/await - block until the job settles or the timeout elapses
///
/// The wait is capped at the notifier's default timeout. Dropping the
/// connection abandons the wait.
pub async fn await_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Query(query): Query<dto::AwaitQuery>,
) -> axum::response::Response {
    let job_id: JobId = match parse_id(&id, "job id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if query.timeout_secs == Some(0) {
        return errors::invalid_argument("timeoutSecs must be positive");
    }

    // Visibility check before waiting on someone else's job.
    if let Err(e) = services.queries.job(principal.account_id(), job_id).await {
        return errors::query_error_to_response(e);
    }

    let cap = services.notifier.default_timeout();
    let timeout = query.timeout_secs.map(|s| Duration::from_secs(s).min(cap));

    match services.notifier.await_job(job_id, timeout, None).await {
        Ok(job) => Json(dto::job_to_json(&job)).into_response(),
        Err(e) => errors::await_error_to_response(e),
    }
}
