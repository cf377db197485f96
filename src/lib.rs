//! Runbook scheduler -- decides when stored runbooks are due and queues their
//! executions.
//!
//! This crate provides the cron matcher, next-run calculator, scheduler loop,
//! execution dispatcher, schedule lifecycle service, SQLite storage and the
//! JSON management API.

pub mod api;
pub mod config;
pub mod scheduler;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::{EngineConfig, SchedulerConfig};
use crate::scheduler::{
    Clock, Dispatcher, ExecutionEngine, HttpExecutionEngine, LogOnlyEngine, ScheduleService,
    SchedulerEngine, SchedulerLoop, SystemClock,
};
use crate::storage::{Pool, ScheduleRepository, SqliteRepository};

/// The lifecycle service and tick engine sharing one store and clock.
#[derive(Clone)]
pub struct Components {
    pub service: ScheduleService,
    pub engine: SchedulerEngine,
}

/// Wire storage, clock and execution engine together. Must be called inside
/// a tokio runtime; the dispatch queue worker is spawned here.
pub fn assemble(pool: Pool, config: &SchedulerConfig, clock: Arc<dyn Clock>) -> Components {
    let repo: Arc<dyn ScheduleRepository> = Arc::new(SqliteRepository::new(pool));
    let probe_limit = config.scheduler.cron_probe_limit();

    let dispatcher = Dispatcher::spawn(repo.clone(), execution_engine(&config.engine), probe_limit);
    Components {
        service: ScheduleService::new(repo.clone(), clock.clone(), probe_limit),
        engine: SchedulerEngine::new(repo, clock, dispatcher),
    }
}

pub fn execution_engine(config: &EngineConfig) -> Arc<dyn ExecutionEngine> {
    match config.endpoint.as_deref() {
        Some(endpoint) => {
            tracing::info!(%endpoint, "Using HTTP execution engine");
            Arc::new(HttpExecutionEngine::new(endpoint))
        }
        None => {
            tracing::warn!("No execution engine endpoint configured, executions will only be queued");
            Arc::new(LogOnlyEngine)
        }
    }
}

/// Start the daemon: storage, scheduler loop and API server. Returns after
/// Ctrl-C once the loop is disarmed and the server has drained.
pub async fn serve(config: &SchedulerConfig) -> Result<()> {
    // 1. Initialize Storage
    tracing::info!(db_path = %config.storage.path, "Initializing database");
    let pool = storage::open_pool(&config.storage.path)?;

    // 2. Wire scheduler
    let components = assemble(pool, config, Arc::new(SystemClock));

    // 3. Start scheduler loop
    let scheduler_loop = SchedulerLoop::new(components.engine.clone(), config.scheduler.tick_interval());
    if config.scheduler.enabled {
        scheduler_loop.start().await;
    } else {
        tracing::warn!("Scheduler loop disabled by configuration");
    }

    // 4. Start API Server
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;
    let app = api::router(api::state::AppState {
        schedules: components.service,
    });

    tracing::info!(%addr, "Runbook scheduler listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler_loop.stop();
    components
        .engine
        .dispatcher()
        .flush_within(config.scheduler.shutdown_timeout())
        .await;
    tracing::info!("Runbook scheduler stopped");
    Ok(())
}

/// Run a single evaluation pass against the configured store and wait for
/// the resulting engine hand-offs.
pub async fn tick_once(config: &SchedulerConfig) -> Result<scheduler::engine::TickSummary> {
    let pool = storage::open_pool(&config.storage.path)?;
    let components = assemble(pool, config, Arc::new(SystemClock));
    let summary = components.engine.tick().await?;
    components.engine.dispatcher().flush().await;
    Ok(summary)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
