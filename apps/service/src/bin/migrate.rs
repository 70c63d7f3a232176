use anyhow::Result;
use sqlx::migrate::Migrator;
use std::path::PathBuf;

use scrape_orchestrator::config::settings::AppConfig;
use scrape_orchestrator::infrastructure::database::establish_connection;
use scrape_orchestrator::utils::logging;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();

    // Same layered configuration as the service, including .env
    let config = AppConfig::load()?;

    let migrations_path = std::env::var("MIGRATIONS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./migrations"));

    tracing::info!("Connecting to database...");
    let pool = establish_connection(&config.database).await?;

    tracing::info!("Running migrations from {}...", migrations_path.display());
    Migrator::new(migrations_path)
        .await?
        .run(&pool)
        .await?;

    tracing::info!("Migrations completed successfully");

    Ok(())
}
