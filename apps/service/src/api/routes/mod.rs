use axum::{routing::get, Router};
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{handlers, health};
use crate::application::rate_profile::service::RateProfileManager;
use crate::application::scheduler::service::SchedulerService;
use crate::infrastructure::queue::RedisQueue;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub queue: Arc<RedisQueue>,
    pub scheduler: Arc<SchedulerService>,
    pub profiles: Arc<RateProfileManager>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Health check routes
        .route("/health", get(health::health_check))

        // Scheduling state
        .route("/api/targets/due", get(handlers::targets::list_due))
        .route("/api/domains/{domain}", get(handlers::domains::get_domain))

        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(
    address: &str,
    port: u16,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", address, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Status API listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
