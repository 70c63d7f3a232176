use sqlx::postgres::{PgPool, PgPoolOptions};
use anyhow::Result;

use crate::config::settings::Database;

pub mod profile_store;
pub mod target_store;

pub use profile_store::{DomainProfileStore, PgDomainProfileStore};
pub use target_store::{PgTargetStore, TargetStore};

pub async fn establish_connection(config: &Database) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;
    
    Ok(pool)
}
