use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::scheduler::frequency::parse_frequency;
use crate::domain::scrape_target::ScrapeTarget;
use crate::infrastructure::database::TargetStore;

/// Selects due targets and maintains their `last_scraped` / `next_scrape`.
pub struct SchedulerService {
    store: Arc<dyn TargetStore>,
    default_frequency: Duration,
}

impl SchedulerService {
    pub fn new(store: Arc<dyn TargetStore>, default_frequency: Duration) -> Self {
        Self {
            store,
            default_frequency,
        }
    }

    pub fn default_frequency(&self) -> Duration {
        self.default_frequency
    }

    /// Up to `limit` due targets, longest-waiting first.
    pub async fn due_targets(&self, limit: u32) -> Result<Vec<ScrapeTarget>> {
        self.store.due_targets(Utc::now(), limit).await
    }

    pub fn effective_frequency(&self, target: &ScrapeTarget) -> Duration {
        let Some(token) = target.frequency_override.as_deref() else {
            return self.default_frequency;
        };
        if token.trim().is_empty() {
            return self.default_frequency;
        }

        match parse_frequency(token) {
            Some(frequency) => frequency,
            None => {
                warn!(
                    "Ignoring unparseable frequency override {:?} on target {}",
                    token, target.id
                );
                self.default_frequency
            }
        }
    }

    /// An explicit `next_scrape_at` is stored verbatim. With only
    /// `last_scraped_at`, the next run is derived from the target's frequency.
    /// Unknown targets are skipped with a warning.
    pub async fn update_schedule(
        &self,
        target_id: Uuid,
        last_scraped_at: Option<DateTime<Utc>>,
        next_scrape_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let next = match (last_scraped_at, next_scrape_at) {
            (_, Some(next)) => next,
            (Some(last), None) => {
                let Some(target) = self.store.find(target_id).await? else {
                    warn!("Schedule update for unknown target {}", target_id);
                    return Ok(());
                };
                last + self.effective_frequency(&target)
            }
            (None, None) => {
                debug!("Empty schedule update for target {}", target_id);
                return Ok(());
            }
        };

        if !self.store.write_schedule(target_id, last_scraped_at, next).await? {
            warn!("Schedule update for unknown target {}", target_id);
            return Ok(());
        }

        debug!("Target {} next scrape at {}", target_id, next);
        Ok(())
    }

    /// Optimistic advance after a publish: `last_scraped = dispatched_at` and
    /// the next run one frequency later. Applied only while `next_scrape` still
    /// holds the value `target` was loaded with, so a failure backoff recorded
    /// in the meantime is kept. Returns whether the advance was applied.
    pub async fn advance_after_dispatch(
        &self,
        target: &ScrapeTarget,
        dispatched_at: DateTime<Utc>,
    ) -> Result<bool> {
        let next = dispatched_at + self.effective_frequency(target);
        let applied = self
            .store
            .advance_schedule(target.id, target.next_scrape, dispatched_at, next)
            .await?;

        if applied {
            debug!("Target {} next scrape at {}", target.id, next);
        } else {
            debug!(
                "Schedule of target {} changed since it was loaded, keeping the stored one",
                target.id
            );
        }
        Ok(applied)
    }
}
