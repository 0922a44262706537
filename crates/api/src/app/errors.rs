use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use creditgate_infra::abuse::AbuseError;
use creditgate_infra::accounts::AccountError;
use creditgate_infra::dispatcher::DispatchError;
use creditgate_infra::notifier::AwaitError;
use creditgate_infra::queries::QueryError;
use creditgate_ledger::DispatchRejection;

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn internal() -> Response {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal error")
}

pub fn invalid_argument(message: impl Into<String>) -> Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_argument", message)
}

pub fn permission_denied(message: impl Into<String>) -> Response {
    json_error(StatusCode::FORBIDDEN, "permission_denied", message)
}

pub fn not_found(message: impl Into<String>) -> Response {
    json_error(StatusCode::NOT_FOUND, "not_found", message)
}

pub fn dispatch_error_to_response(err: DispatchError) -> Response {
    match err {
        DispatchError::InvalidArgument(msg) => invalid_argument(msg),
        DispatchError::Rejected(rejection) => {
            let message = rejection.to_string();
            match rejection {
                DispatchRejection::InsufficientCredits { .. } => {
                    json_error(StatusCode::PAYMENT_REQUIRED, "insufficient_credits", message)
                }
                DispatchRejection::TrialAlreadyUsed(_) => json_error(StatusCode::CONFLICT, "trial_already_used", message),
                DispatchRejection::Blocked { .. } => permission_denied(message),
            }
        }
        e @ (DispatchError::AccountNotFound(_) | DispatchError::Contention { .. } | DispatchError::Store(_)) => {
            error!(error = %e, "dispatch failed");
            internal()
        }
    }
}

pub fn await_error_to_response(err: AwaitError) -> Response {
    let message = err.to_string();
    match err {
        AwaitError::Timeout => json_error(StatusCode::GATEWAY_TIMEOUT, "timeout", message),
        AwaitError::EmptyResult => json_error(StatusCode::BAD_GATEWAY, "empty_result", message),
        AwaitError::JobFailed(_) => json_error(StatusCode::BAD_GATEWAY, "job_failed", message),
        AwaitError::JobDeleted => json_error(StatusCode::GONE, "job_deleted", message),
        AwaitError::Cancelled => json_error(StatusCode::SERVICE_UNAVAILABLE, "cancelled", message),
        AwaitError::Feed(_) => {
            error!(error = %message, "job feed failed");
            internal()
        }
    }
}

pub fn query_error_to_response(err: QueryError) -> Response {
    match err {
        QueryError::NotFound { entity, .. } => not_found(format!("{entity} not found")),
        QueryError::Forbidden(_) => permission_denied("not allowed to read this job"),
        QueryError::Store(e) => {
            error!(error = %e, "query failed");
            internal()
        }
    }
}

pub fn account_error_to_response(err: AccountError) -> Response {
    match err {
        AccountError::InvalidArgument(msg) => invalid_argument(msg),
        AccountError::NotFound(_) | AccountError::Abuse(AbuseError::AccountNotFound(_)) => {
            not_found("account not found")
        }
        e @ (AccountError::Contention(_) | AccountError::Abuse(_) | AccountError::Store(_)) => {
            error!(error = %e, "account operation failed");
            internal()
        }
    }
}
