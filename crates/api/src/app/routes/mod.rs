use axum::{Router, routing::get};

pub mod account;
pub mod admin;
pub mod common;
pub mod jobs;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/notices", get(account::notices))
        .nest("/jobs", jobs::router())
        .nest("/account", account::router())
        .nest("/admin", admin::router())
}
