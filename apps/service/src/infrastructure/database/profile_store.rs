use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;

use crate::domain::domain_profile::{DomainRateProfile, HeaderSet};

/// Persisted per-domain rate state, keyed by lowercase hostname.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DomainProfileStore: Send + Sync {
    async fn find(&self, domain: &str) -> Result<Option<DomainRateProfile>>;

    /// Inserts `profile` unless a row for its domain exists and returns the
    /// stored row either way. Concurrent callers converge on a single row.
    async fn insert_if_absent(&self, profile: &DomainRateProfile) -> Result<DomainRateProfile>;

    /// Sets both gate timestamps in one write. Returns `false` when the
    /// domain has no row.
    async fn record_request(
        &self,
        domain: &str,
        at: DateTime<Utc>,
        next_allowed_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Takes the gate: stamps the request and closes the gate until
    /// `next_allowed_at`, but only while the gate is open at `at`. Returns
    /// `false` when the gate was already closed (or the row is missing).
    async fn claim_slot(
        &self,
        domain: &str,
        at: DateTime<Utc>,
        next_allowed_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Restores the previous gate state if the gate still holds the claim
    /// ending at `claimed_until`. Returns `false` when it no longer does.
    async fn release_slot(
        &self,
        domain: &str,
        claimed_until: DateTime<Utc>,
        previous_request_at: Option<DateTime<Utc>>,
        previous_allowed_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;
}

#[derive(Debug, FromRow)]
struct DomainProfileRow {
    domain: String,
    user_agents: Json<Vec<String>>,
    header_profiles: Json<BTreeMap<String, HeaderSet>>,
    min_delay_ms: i64,
    max_delay_ms: i64,
    last_request_at: Option<DateTime<Utc>>,
    next_allowed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DomainProfileRow> for DomainRateProfile {
    fn from(row: DomainProfileRow) -> Self {
        DomainRateProfile {
            domain: row.domain,
            user_agents: row.user_agents.0,
            header_profiles: row.header_profiles.0,
            min_delay_ms: row.min_delay_ms,
            max_delay_ms: row.max_delay_ms,
            last_request_at: row.last_request_at,
            next_allowed_at: row.next_allowed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const PROFILE_COLUMNS: &str = "domain, user_agents, header_profiles, min_delay_ms, max_delay_ms, \
     last_request_at, next_allowed_at, created_at, updated_at";

pub struct PgDomainProfileStore {
    db_pool: PgPool,
}

impl PgDomainProfileStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl DomainProfileStore for PgDomainProfileStore {
    async fn find(&self, domain: &str) -> Result<Option<DomainRateProfile>> {
        let query = format!("SELECT {PROFILE_COLUMNS} FROM domain_rate_profiles WHERE domain = $1");

        let row = sqlx::query_as::<_, DomainProfileRow>(&query)
            .bind(domain)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(row.map(DomainRateProfile::from))
    }

    async fn insert_if_absent(&self, profile: &DomainRateProfile) -> Result<DomainRateProfile> {
        // The no-op DO UPDATE makes RETURNING yield the existing row on conflict
        let query = format!(
            r#"
            INSERT INTO domain_rate_profiles ({PROFILE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (domain) DO UPDATE SET domain = EXCLUDED.domain
            RETURNING {PROFILE_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, DomainProfileRow>(&query)
            .bind(&profile.domain)
            .bind(Json(&profile.user_agents))
            .bind(Json(&profile.header_profiles))
            .bind(profile.min_delay_ms)
            .bind(profile.max_delay_ms)
            .bind(profile.last_request_at)
            .bind(profile.next_allowed_at)
            .bind(profile.created_at)
            .bind(profile.updated_at)
            .fetch_one(&self.db_pool)
            .await?;

        Ok(row.into())
    }

    async fn record_request(
        &self,
        domain: &str,
        at: DateTime<Utc>,
        next_allowed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE domain_rate_profiles
            SET last_request_at = $2,
                next_allowed_at = $3,
                updated_at = $2
            WHERE domain = $1
            "#,
        )
        .bind(domain)
        .bind(at)
        .bind(next_allowed_at)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn claim_slot(
        &self,
        domain: &str,
        at: DateTime<Utc>,
        next_allowed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE domain_rate_profiles
            SET last_request_at = $2,
                next_allowed_at = $3,
                updated_at = $2
            WHERE domain = $1
              AND (next_allowed_at IS NULL OR next_allowed_at <= $2)
            "#,
        )
        .bind(domain)
        .bind(at)
        .bind(next_allowed_at)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_slot(
        &self,
        domain: &str,
        claimed_until: DateTime<Utc>,
        previous_request_at: Option<DateTime<Utc>>,
        previous_allowed_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE domain_rate_profiles
            SET last_request_at = $3,
                next_allowed_at = $4,
                updated_at = NOW()
            WHERE domain = $1
              AND next_allowed_at = $2
            "#,
        )
        .bind(domain)
        .bind(claimed_until)
        .bind(previous_request_at)
        .bind(previous_allowed_at)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
