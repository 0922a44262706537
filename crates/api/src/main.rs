use anyhow::Context;
use chrono::{Duration, Utc};

use creditgate_auth::Hs256JwtIssuer;
use creditgate_infra::{Runtime, Settings};
use creditgate_ledger::AccountRole;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("invalid configuration")?;
    creditgate_observability::init(&settings.log);

    let runtime = Runtime::from_settings(&settings)
        .await
        .context("failed to start runtime")?;

    if settings.bootstrap_admin {
        let admin = runtime
            .accounts
            .create_account(AccountRole::Admin, 0)
            .await
            .context("failed to create bootstrap admin")?;
        let token = Hs256JwtIssuer::new(&settings.jwt_secret)
            .issue(admin.id, Utc::now(), Duration::days(1))
            .context("failed to sign bootstrap token")?;
        tracing::warn!(account_id = %admin.id, %token, "bootstrap admin created; token valid for 24h");
    }

    let app = creditgate_api::app::build_app(&settings.jwt_secret, &runtime);

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    runtime.shutdown().await;
    Ok(())
}
