//! Handles the HTTP layer needs from the running service.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio::sync::mpsc::unbounded_channel;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use creditgate_auth::Hs256JwtIssuer;
use creditgate_core::AccountId;
use creditgate_events::{ClientNotice, EventBus, InMemoryEventBus};
use creditgate_infra::Runtime;
use creditgate_infra::accounts::AccountService;
use creditgate_infra::dispatcher::Dispatcher;
use creditgate_infra::notifier::CompletionNotifier;
use creditgate_infra::queries::AccountQueries;

/// Default lifetime of tokens minted for provisioned accounts.
pub const DEFAULT_TOKEN_TTL_DAYS: i64 = 30;

const HEARTBEAT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct AppServices {
    pub dispatcher: Arc<Dispatcher>,
    pub notifier: Arc<CompletionNotifier>,
    pub accounts: Arc<AccountService>,
    pub queries: Arc<AccountQueries>,
    pub notices: Arc<InMemoryEventBus<ClientNotice>>,
    pub issuer: Hs256JwtIssuer,
}

impl AppServices {
    pub fn from_runtime(runtime: &Runtime, issuer: Hs256JwtIssuer) -> Self {
        Self {
            dispatcher: runtime.dispatcher.clone(),
            notifier: runtime.notifier.clone(),
            accounts: runtime.accounts.clone(),
            queries: runtime.queries.clone(),
            notices: runtime.notices.clone(),
            issuer,
        }
    }
}

/// SSE stream of the notices addressed to `account_id`.
///
/// The bus subscription is blocking, so it is drained on a blocking task and
/// bridged into an async channel.
pub fn notice_sse_stream(
    services: Arc<AppServices>,
    account_id: AccountId,
) -> Sse<UnboundedReceiverStream<Result<SseEvent, Infallible>>> {
    let (tx, rx) = unbounded_channel::<Result<SseEvent, Infallible>>();
    let subscription = services.notices.subscribe();

    tokio::task::spawn_blocking(move || {
        loop {
            match subscription.recv_timeout(HEARTBEAT) {
                Ok(notice) => {
                    if notice.account_id() != account_id {
                        continue;
                    }
                    let Ok(data) = serde_json::to_string(&notice) else {
                        continue;
                    };
                    if tx.send(Ok(SseEvent::default().event(notice.topic()).data(data))).is_err() {
                        break;
                    }
                }
                // Probe the client so a closed stream ends this task.
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if tx.send(Ok(SseEvent::default().comment("ping"))).is_err() {
                        break;
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!(account_id = %account_id, "notice stream closed");
    });

    Sse::new(UnboundedReceiverStream::new(rx)).keep_alive(KeepAlive::new().interval(HEARTBEAT))
}
