//! Operator routes for provisioning and policing accounts.
//!
//! Every handler first loads the caller's stored account and requires the
//! admin role; token contents never grant privileges.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use tracing::{error, warn};

use creditgate_core::{AccountId, JobId};
use creditgate_ledger::AccountRole;

use crate::app::routes::common::{parse_id, require_admin};
use crate::app::services::{AppServices, DEFAULT_TOKEN_TTL_DAYS};
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/accounts", post(create_account))
        .route("/accounts/:id", get(get_account))
        .route("/accounts/:id/credits", post(adjust_credits))
        .route("/accounts/:id/block", post(block_account))
        .route("/accounts/:id/unblock", post(unblock_account))
        .route("/accounts/:id/risk", post(evaluate_risk))
        .route("/accounts/:id/token", post(issue_token))
        .route("/jobs/:id", axum::routing::delete(delete_job))
}

fn token_ttl(days: Option<i64>) -> Result<chrono::Duration, axum::response::Response> {
    let days = days.unwrap_or(DEFAULT_TOKEN_TTL_DAYS);
    if days <= 0 {
        return Err(errors::invalid_argument("token ttl must be positive"));
    }
    Ok(chrono::Duration::days(days))
}

fn mint_token(services: &AppServices, id: AccountId, ttl: chrono::Duration) -> Result<String, axum::response::Response> {
    services.issuer.issue(id, Utc::now(), ttl).map_err(|e| {
        error!(account_id = %id, error = %e, "token signing failed");
        errors::internal()
    })
}

/// POST /admin/accounts - provision an account and mint its first token
pub async fn create_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateAccountBody>,
) -> axum::response::Response {
    if let Err(resp) = require_admin(&services, &principal).await {
        return resp;
    }
    let role: AccountRole = match body.role.parse() {
        Ok(r) => r,
        Err(e) => return errors::invalid_argument(format!("{e}")),
    };
    let ttl = match token_ttl(body.token_ttl_days) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let account = match services.accounts.create_account(role, body.initial_credits).await {
        Ok(a) => a,
        Err(e) => return errors::account_error_to_response(e),
    };
    let token = match mint_token(&services, account.id, ttl) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "account": dto::account_to_json(&account),
            "token": token,
        })),
    )
        .into_response()
}

pub async fn get_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require_admin(&services, &principal).await {
        return resp;
    }
    let id: AccountId = match parse_id(&id, "account id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.accounts.account(id).await {
        Ok(account) => Json(dto::account_to_json(&account.value)).into_response(),
        Err(e) => errors::account_error_to_response(e),
    }
}

/// POST /admin/accounts/:id/credits - grant or reset credits
pub async fn adjust_credits(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AdjustCreditsBody>,
) -> axum::response::Response {
    if let Err(resp) = require_admin(&services, &principal).await {
        return resp;
    }
    let id: AccountId = match parse_id(&id, "account id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let adjustment = match body.adjustment() {
        Ok(a) => a,
        Err(resp) => return resp,
    };

    match services.accounts.adjust_credits(id, adjustment, body.note).await {
        Ok(account) => Json(dto::account_to_json(&account)).into_response(),
        Err(e) => errors::account_error_to_response(e),
    }
}

pub async fn block_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::BlockBody>,
) -> axum::response::Response {
    let admin = match require_admin(&services, &principal).await {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let id: AccountId = match parse_id(&id, "account id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if id == admin.id {
        return errors::invalid_argument("cannot block your own account");
    }

    let duration = body.duration_secs.map(chrono::Duration::seconds);
    match services.accounts.block(id, body.reason, duration).await {
        Ok(account) => {
            warn!(account_id = %id, admin_id = %admin.id, "account blocked via api");
            Json(dto::account_to_json(&account)).into_response()
        }
        Err(e) => errors::account_error_to_response(e),
    }
}

pub async fn unblock_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require_admin(&services, &principal).await {
        return resp;
    }
    let id: AccountId = match parse_id(&id, "account id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.accounts.unblock(id).await {
        Ok(account) => Json(dto::account_to_json(&account)).into_response(),
        Err(e) => errors::account_error_to_response(e),
    }
}

/// POST /admin/accounts/:id/risk - score recent activity now (may block)
pub async fn evaluate_risk(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require_admin(&services, &principal).await {
        return resp;
    }
    let id: AccountId = match parse_id(&id, "account id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.accounts.evaluate_risk(id).await {
        Ok(evaluation) => Json(evaluation).into_response(),
        Err(e) => errors::account_error_to_response(e),
    }
}

pub async fn issue_token(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::IssueTokenBody>>,
) -> axum::response::Response {
    if let Err(resp) = require_admin(&services, &principal).await {
        return resp;
    }
    let id: AccountId = match parse_id(&id, "account id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let ttl = match token_ttl(body.and_then(|Json(b)| b.ttl_days)) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    if let Err(e) = services.accounts.account(id).await {
        return errors::account_error_to_response(e);
    }

    match mint_token(&services, id, ttl) {
        Ok(token) => Json(serde_json::json!({ "accountId": id.to_string(), "token": token })).into_response(),
        Err(resp) => resp,
    }
}

/// DELETE /admin/jobs/:id - drop a job record; pending waiters see `job_deleted`
pub async fn delete_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require_admin(&services, &principal).await {
        return resp;
    }
    let job_id: JobId = match parse_id(&id, "job id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.accounts.delete_job(job_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => errors::not_found("job not found"),
        Err(e) => errors::account_error_to_response(e),
    }
}
