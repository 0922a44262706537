use std::str::FromStr;

use axum::response::Response;

use creditgate_ledger::Account;

use crate::app::{errors, services::AppServices};
use crate::context::PrincipalContext;

/// Load the caller's account and require the admin role.
pub async fn require_admin(services: &AppServices, principal: &PrincipalContext) -> Result<Account, Response> {
    let account = services
        .accounts
        .account(principal.account_id())
        .await
        .map_err(|e| match e {
            // A token for a deleted account grants nothing.
            creditgate_infra::accounts::AccountError::NotFound(_) => errors::permission_denied("admin role required"),
            other => errors::account_error_to_response(other),
        })?
        .into_inner();

    if account.is_admin() {
        Ok(account)
    } else {
        Err(errors::permission_denied("admin role required"))
    }
}

/// Parse a path identifier, answering 400 on malformed input.
pub fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, Response> {
    raw.parse::<T>()
        .map_err(|_| errors::invalid_argument(format!("invalid {what}: {raw}")))
}

/// First address of `X-Forwarded-For`, if present.
pub fn client_ip(headers: &axum::http::HeaderMap) -> Option<String> {
    let raw = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = raw.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}
