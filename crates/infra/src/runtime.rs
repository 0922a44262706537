//! Wiring of every component into one running service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{info, warn};

use creditgate_ai::{
    AbuseDetector, CompletionError, CompletionProvider, CompletionRequest, CompletionResponse, HttpCompletionProvider,
    PromptDefaults,
};
use creditgate_events::{ClientNotice, InMemoryEventBus};

use crate::abuse::{AbuseMonitor, AbuseRunnerConfig, AbuseRunnerHandle, spawn_abuse_runner};
use crate::accounts::AccountService;
use crate::audit::{AuditSink, InMemoryAuditSink, TracingAuditSink};
use crate::client::DispatchClient;
use crate::config::{AbuseSettings, Settings};
use crate::dispatcher::{DispatchPolicy, Dispatcher};
use crate::jobs::{JobProcessor, WorkerPoolConfig, WorkerPoolHandle, WorkerStats, spawn_worker_pool};
use crate::notifier::CompletionNotifier;
use crate::prompts::StaticPromptSettings;
use crate::queries::AccountQueries;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::store::{CreditStore, InMemoryStore, PostgresStore, StoreError};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("store initialisation failed: {0}")]
    Store(#[from] StoreError),

    #[error("completion provider initialisation failed: {0}")]
    Provider(#[from] CompletionError),
}

/// Tunables for [`Runtime::start`].
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub workers: usize,
    pub poll_interval: Duration,
    pub await_timeout: Duration,
    pub provider_timeout: Duration,
    pub rate_limit: RateLimitConfig,
    pub abuse: AbuseSettings,
    pub prompts: PromptDefaults,
    pub low_credit_threshold: i64,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_millis(500),
            await_timeout: Duration::from_secs(300),
            provider_timeout: Duration::from_secs(60),
            rate_limit: RateLimitConfig::default(),
            abuse: AbuseSettings {
                thresholds: Default::default(),
                sweep_interval: Duration::from_secs(60),
            },
            prompts: PromptDefaults::default(),
            low_credit_threshold: 3,
        }
    }
}

impl From<&Settings> for RuntimeOptions {
    fn from(s: &Settings) -> Self {
        Self {
            workers: s.workers,
            poll_interval: s.poll_interval,
            await_timeout: s.await_timeout,
            provider_timeout: s.provider.request_timeout,
            rate_limit: s.rate_limit,
            abuse: s.abuse.clone(),
            prompts: s.prompts.clone(),
            low_credit_threshold: s.low_credit_threshold,
        }
    }
}

/// Stand-in used when no provider URL is configured; every job fails.
#[derive(Debug, Default)]
pub struct UnconfiguredProvider;

#[async_trait]
impl CompletionProvider for UnconfiguredProvider {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse, CompletionError> {
        Err(CompletionError::Transport("no completion provider configured".to_string()))
    }
}

pub struct Runtime {
    pub store: Arc<dyn CreditStore>,
    pub notices: Arc<InMemoryEventBus<ClientNotice>>,
    pub audit: Arc<dyn AuditSink>,
    pub activity: Arc<InMemoryAuditSink>,
    pub prompts: Arc<StaticPromptSettings>,
    pub dispatcher: Arc<Dispatcher>,
    pub notifier: Arc<CompletionNotifier>,
    pub monitor: Arc<AbuseMonitor>,
    pub accounts: Arc<AccountService>,
    pub queries: Arc<AccountQueries>,
    rate_limit: RateLimitConfig,
    workers: WorkerPoolHandle,
    abuse_runner: AbuseRunnerHandle,
}

impl Runtime {
    /// Connect the configured store and provider, then start.
    pub async fn from_settings(settings: &Settings) -> Result<Self, RuntimeError> {
        let store: Arc<dyn CreditStore> = match &settings.database_url {
            Some(url) => {
                let pg = PostgresStore::connect(url, settings.database_max_connections).await?;
                pg.migrate().await?;
                info!("using postgres store");
                Arc::new(pg)
            }
            None => {
                warn!("DATABASE_URL not set; using in-memory store");
                Arc::new(InMemoryStore::new())
            }
        };

        let provider: Arc<dyn CompletionProvider> = match &settings.provider.base_url {
            Some(url) => Arc::new(HttpCompletionProvider::new(
                url,
                settings.provider.api_key.clone(),
                settings.provider.request_timeout,
            )?),
            None => {
                warn!("CREDITGATE_PROVIDER_URL not set; jobs will fail");
                Arc::new(UnconfiguredProvider)
            }
        };

        Ok(Self::start(store, provider, RuntimeOptions::from(settings)))
    }

    /// Build every component and spawn the worker pool and abuse runner.
    /// Must be called inside a tokio runtime.
    pub fn start(store: Arc<dyn CreditStore>, provider: Arc<dyn CompletionProvider>, options: RuntimeOptions) -> Self {
        let notices = Arc::new(InMemoryEventBus::<ClientNotice>::new());
        let activity = Arc::new(InMemoryAuditSink::new());
        let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink::new().forward_to(activity.clone()));
        let prompts = Arc::new(StaticPromptSettings::new(options.prompts.clone()));
        let wake = Arc::new(Notify::new());

        let monitor = Arc::new(
            AbuseMonitor::new(
                store.clone(),
                AbuseDetector::with_thresholds(options.abuse.thresholds.clone()),
                audit.clone(),
                notices.clone(),
            )
            .with_activity_log(activity.clone()),
        );
        let abuse_runner = spawn_abuse_runner(
            monitor.clone(),
            store.clone(),
            AbuseRunnerConfig {
                sweep_interval: options.abuse.sweep_interval,
                ..AbuseRunnerConfig::default()
            },
        );

        let dispatcher = Arc::new(
            Dispatcher::new(store.clone(), wake.clone(), audit.clone(), notices.clone())
                .with_policy(DispatchPolicy {
                    low_credit_threshold: options.low_credit_threshold,
                    ..DispatchPolicy::default()
                })
                .with_abuse_trigger(abuse_runner.trigger()),
        );

        let processor = Arc::new(
            JobProcessor::new(store.clone(), provider.clone(), prompts.clone(), notices.clone(), audit.clone())
                .with_request_timeout(options.provider_timeout),
        );
        let workers = spawn_worker_pool(
            store.clone(),
            processor,
            wake,
            WorkerPoolConfig::default()
                .with_workers(options.workers)
                .with_poll_interval(options.poll_interval),
        );

        let notifier = Arc::new(CompletionNotifier::new(store.clone()).with_default_timeout(options.await_timeout));
        let accounts = Arc::new(
            AccountService::new(store.clone(), audit.clone(), notices.clone()).with_monitor(monitor.clone()),
        );
        let queries = Arc::new(AccountQueries::new(store.clone(), options.low_credit_threshold));

        info!(
            workers = options.workers,
            provider = provider.name(),
            await_timeout_secs = options.await_timeout.as_secs(),
            "runtime started"
        );

        Self {
            store,
            notices,
            audit,
            activity,
            prompts,
            dispatcher,
            notifier,
            monitor,
            accounts,
            queries,
            rate_limit: options.rate_limit,
            workers,
            abuse_runner,
        }
    }

    /// A new client with its own rate limiter.
    pub fn client(&self) -> DispatchClient {
        DispatchClient::new(
            RateLimiter::new(self.rate_limit),
            self.dispatcher.clone(),
            self.notifier.clone(),
        )
    }

    pub fn worker_stats(&self) -> WorkerStats {
        self.workers.stats()
    }

    /// Stop background tasks; in-flight jobs finish first.
    pub async fn shutdown(self) {
        self.abuse_runner.shutdown().await;
        self.workers.shutdown().await;
        info!("runtime stopped");
    }
}
