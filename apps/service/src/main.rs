use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use scrape_orchestrator::api::routes::{self, AppState};
use scrape_orchestrator::application::dispatch::service::DispatchService;
use scrape_orchestrator::application::feedback::service::FeedbackService;
use scrape_orchestrator::application::rate_profile::service::RateProfileManager;
use scrape_orchestrator::application::scheduler::service::SchedulerService;
use scrape_orchestrator::config::settings::AppConfig;
use scrape_orchestrator::infrastructure::database::{
    establish_connection, PgDomainProfileStore, PgTargetStore,
};
use scrape_orchestrator::infrastructure::queue::RedisQueue;
use scrape_orchestrator::utils::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    logging::init_tracing();

    info!("Starting scrape orchestrator");

    // Load configuration
    let config = AppConfig::load()?;
    info!("Configuration loaded");

    // Initialize database connection
    let db_pool = establish_connection(&config.database).await?;
    info!("Database connection established");

    // Initialize Redis queues
    let queue = Arc::new(RedisQueue::new(&config.redis).await?);
    queue.recover_in_flight().await?;
    info!("Redis queue initialized");

    let scheduler = Arc::new(SchedulerService::new(
        Arc::new(PgTargetStore::new(db_pool.clone())),
        config.default_frequency(),
    ));
    let profiles = Arc::new(RateProfileManager::new(
        Arc::new(PgDomainProfileStore::new(db_pool.clone())),
        &config.rate_limit,
    ));

    let dispatch = DispatchService::new(
        scheduler.clone(),
        profiles.clone(),
        queue.clone(),
        config.dispatch.clone(),
    );
    let feedback = FeedbackService::new(scheduler.clone(), queue.clone());

    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    // Start the dispatch loop
    let token = shutdown.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = dispatch.run(token).await {
            error!("Dispatch loop error: {}", e);
        }
    }));

    // Start the feedback loop
    if config.feedback.enabled {
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = feedback.run(token).await {
                error!("Feedback loop error: {}", e);
            }
        }));
    } else {
        info!("Feedback loop is disabled");
    }

    // Start the API server
    if config.server.enabled {
        let state = AppState {
            db_pool: db_pool.clone(),
            queue: queue.clone(),
            scheduler: scheduler.clone(),
            profiles: profiles.clone(),
        };
        let token = shutdown.clone();
        let server = config.server.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = routes::serve(&server.address, server.port, state, token).await {
                error!("API server error: {}", e);
            }
        }));
    }

    wait_for_signal().await;
    info!("Shutdown signal received, letting in-flight work finish");
    shutdown.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Task ended abnormally: {}", e);
        }
    }

    db_pool.close().await;
    info!("All services stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Error installing SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
