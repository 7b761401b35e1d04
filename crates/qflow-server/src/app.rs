//! Application orchestration.
//!
//! Builds the store, hub, notification pool and dispatcher from
//! configuration, runs the HTTP server and the background loops, and shuts
//! everything down in order on Ctrl-C.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use qflow_core::{BusinessCalendar, Clock, DisplayNames, SystemClock, TopicId};
use qflow_engine::{
    ClosingScheduler, Dispatcher, DynNotifier, LogNotifier, NotificationPool, RetentionSweeper,
};
use qflow_hub::{spawn_hub, ConnectionLimiter, HubHandle};
use qflow_store::{DynStore, MemoryStore, NewCounter, NewTopic, QueueStore, StoreError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{create_router, AppState};
use crate::auth::StaticTokenVerifier;
use crate::config::{AppConfig, DatabaseConfig, SeedConfig};
use crate::error::{AppError, AppResult};

/// Running components shared by the HTTP layer and the background loops.
pub struct Services {
    pub state: AppState,
    pub store: DynStore,
    pub hub: HubHandle,
    pub pool: NotificationPool,
    hub_task: JoinHandle<()>,
    clock: Arc<dyn Clock>,
    calendar: BusinessCalendar,
    config: AppConfig,
}

impl Services {
    /// Wire the components around an already opened store.
    pub fn build(
        config: &AppConfig,
        store: DynStore,
        notifier: DynNotifier,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        let calendar = config.calendar()?;
        let (hub, hub_task) = spawn_hub(config.server.subscriber_buffer);
        let pool = NotificationPool::start(config.notification_pool(), notifier);

        let dispatcher = Dispatcher::new(
            store.clone(),
            hub.clone(),
            pool.sender(),
            clock.clone(),
            calendar,
        );
        let verifier = StaticTokenVerifier::new(&config.identity.tokens);
        info!(tokens = verifier.len(), "Identity verifier ready");

        let state = AppState {
            dispatcher,
            hub: hub.clone(),
            limiter: Arc::new(ConnectionLimiter::new(config.server.max_ws_connections)),
            verifier: Arc::new(verifier),
        };

        Ok(Self {
            state,
            store,
            hub,
            pool,
            hub_task,
            clock,
            calendar,
            config: config.clone(),
        })
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Start the closing scheduler and the retention sweeper.
    pub fn spawn_background(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let scheduler = ClosingScheduler::new(
            self.store.clone(),
            self.hub.clone(),
            self.pool.sender(),
            self.clock.clone(),
            self.calendar,
            self.config.closing(),
        );
        let sweeper = RetentionSweeper::new(
            self.store.clone(),
            self.clock.clone(),
            self.calendar,
            Duration::from_secs(self.config.scheduler.retention_interval_secs),
            self.config.scheduler.retention_days,
        );
        vec![
            tokio::spawn(scheduler.run(cancel.child_token())),
            tokio::spawn(sweeper.run(cancel.child_token())),
        ]
    }

    /// Drain notifications, then stop the hub.
    pub async fn shutdown(self, timeout: Duration) {
        if !self.pool.shutdown(timeout).await {
            warn!("Some notifications were abandoned at shutdown");
        }
        self.hub.shutdown();
        if let Err(e) = self.hub_task.await {
            warn!(error = %e, "Hub task ended abnormally");
        }
    }
}

/// Open the configured store.
pub async fn open_store(config: &DatabaseConfig) -> AppResult<DynStore> {
    match &config.url {
        None => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "postgres")]
        Some(url) => {
            let store = qflow_store::PgStore::connect(url, config.max_connections).await?;
            store.migrate().await?;
            info!(max_connections = config.max_connections, "Using PostgreSQL store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        Some(_) => Err(AppError::Config(
            "database.url is set but this build has no postgres support".to_string(),
        )),
    }
}

/// Insert the configured topics and counters. Skipped if the first topic
/// code already exists.
pub async fn seed(store: &DynStore, seed: &SeedConfig) -> AppResult<()> {
    let mut topic_ids: HashMap<&str, TopicId> = HashMap::new();
    for (i, topic) in seed.topics.iter().enumerate() {
        let inserted = store
            .insert_topic(NewTopic {
                names: DisplayNames {
                    th: topic.name_th.clone(),
                    en: topic.name_en.clone(),
                },
                code: topic.code.clone(),
            })
            .await;
        match inserted {
            Ok(t) => {
                topic_ids.insert(topic.code.as_str(), t.id);
            }
            Err(StoreError::Conflict(_)) if i == 0 => {
                info!("Seed data already present, skipping");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }

    for counter in &seed.counters {
        let topics = counter
            .topics
            .iter()
            .map(|code| {
                topic_ids.get(code.as_str()).copied().ok_or_else(|| {
                    AppError::Config(format!(
                        "counter {} refers to unknown topic code {code:?}",
                        counter.label
                    ))
                })
            })
            .collect::<AppResult<Vec<_>>>()?;
        store
            .insert_counter(NewCounter {
                label: counter.label.clone(),
                open: counter.open,
                closes_at: counter.closing_time()?,
                topics,
            })
            .await?;
    }

    info!(
        topics = seed.topics.len(),
        counters = seed.counters.len(),
        "Seed data loaded"
    );
    Ok(())
}

/// Run the service until Ctrl-C.
pub async fn run(config: AppConfig) -> AppResult<()> {
    let store = open_store(&config.database).await?;
    seed(&store, &config.seed).await?;

    let services = Services::build(
        &config,
        store,
        Arc::new(LogNotifier),
        Arc::new(SystemClock),
    )?;
    let cancel = CancellationToken::new();
    let background = services.spawn_background(&cancel);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    info!(addr = %config.server.bind_addr, "Listening");

    let shutdown = cancel.clone();
    axum::serve(listener, services.router())
        .with_graceful_shutdown(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
            }
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    for task in background {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
    services.shutdown(config.shutdown_timeout()).await;

    info!("Shutdown complete");
    Ok(())
}
