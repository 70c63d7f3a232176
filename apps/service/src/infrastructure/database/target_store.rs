use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::domain::scrape_target::{ScrapeTarget, SiteConfig};

/// Access to the scrape targets owned by the administration side. Only the
/// schedule columns are ever written from here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Active targets with `next_scrape` unset or `<= now`, unset first, then
    /// ascending `next_scrape`.
    async fn due_targets(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ScrapeTarget>>;

    async fn find(&self, id: Uuid) -> Result<Option<ScrapeTarget>>;

    /// Writes `next_scrape` and, when given, `last_scraped` in one statement.
    /// Returns `false` when no row has that id.
    async fn write_schedule(
        &self,
        id: Uuid,
        last_scraped: Option<DateTime<Utc>>,
        next_scrape: DateTime<Utc>,
    ) -> Result<bool>;

    /// Writes both schedule columns only while `next_scrape` still equals
    /// `expected_next`. Returns `false` when it changed or the row is gone.
    async fn advance_schedule(
        &self,
        id: Uuid,
        expected_next: Option<DateTime<Utc>>,
        last_scraped: DateTime<Utc>,
        next_scrape: DateTime<Utc>,
    ) -> Result<bool>;
}

#[derive(Debug, FromRow)]
struct ScrapeTargetRow {
    id: Uuid,
    product_id: Uuid,
    seller_name: String,
    url: String,
    active: bool,
    frequency_override: Option<String>,
    last_scraped: Option<DateTime<Utc>>,
    next_scrape: Option<DateTime<Utc>>,
    site_config_id: Option<Uuid>,
    selectors: Option<Json<serde_json::Value>>,
}

impl From<ScrapeTargetRow> for ScrapeTarget {
    fn from(row: ScrapeTargetRow) -> Self {
        // A dangling reference (config row deleted) counts as no configuration
        let site_config = match (row.site_config_id, row.selectors) {
            (Some(id), Some(Json(selectors))) => Some(SiteConfig { id, selectors }),
            _ => None,
        };

        ScrapeTarget {
            id: row.id,
            product_id: row.product_id,
            seller_name: row.seller_name,
            url: row.url,
            site_config,
            active: row.active,
            frequency_override: row.frequency_override,
            last_scraped: row.last_scraped,
            next_scrape: row.next_scrape,
        }
    }
}

const SELECT_TARGET: &str = r#"
    SELECT
        t.id, t.product_id, t.seller_name, t.url, t.active,
        t.frequency_override, t.last_scraped, t.next_scrape,
        t.site_config_id, c.selectors
    FROM scrape_targets t
    LEFT JOIN site_configs c ON c.id = t.site_config_id
"#;

pub struct PgTargetStore {
    db_pool: PgPool,
}

impl PgTargetStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl TargetStore for PgTargetStore {
    async fn due_targets(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ScrapeTarget>> {
        let query = format!(
            r#"{SELECT_TARGET}
            WHERE t.active = true
              AND (t.next_scrape IS NULL OR t.next_scrape <= $1)
            ORDER BY t.next_scrape ASC NULLS FIRST, t.id ASC
            LIMIT $2
            "#
        );

        let rows = sqlx::query_as::<_, ScrapeTargetRow>(&query)
            .bind(now)
            .bind(i64::from(limit))
            .fetch_all(&self.db_pool)
            .await?;

        Ok(rows.into_iter().map(ScrapeTarget::from).collect())
    }

    async fn find(&self, id: Uuid) -> Result<Option<ScrapeTarget>> {
        let query = format!("{SELECT_TARGET} WHERE t.id = $1");

        let row = sqlx::query_as::<_, ScrapeTargetRow>(&query)
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(row.map(ScrapeTarget::from))
    }

    async fn write_schedule(
        &self,
        id: Uuid,
        last_scraped: Option<DateTime<Utc>>,
        next_scrape: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scrape_targets
            SET last_scraped = COALESCE($2, last_scraped),
                next_scrape = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(last_scraped)
        .bind(next_scrape)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn advance_schedule(
        &self,
        id: Uuid,
        expected_next: Option<DateTime<Utc>>,
        last_scraped: DateTime<Utc>,
        next_scrape: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scrape_targets
            SET last_scraped = $2,
                next_scrape = $3
            WHERE id = $1
              AND next_scrape IS NOT DISTINCT FROM $4
            "#,
        )
        .bind(id)
        .bind(last_scraped)
        .bind(next_scrape)
        .bind(expected_next)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
