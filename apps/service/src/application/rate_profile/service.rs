use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::settings::RateLimit as RateLimitConfig;
use crate::domain::domain_profile::{DomainRateProfile, GateClaim, Identity};
use crate::infrastructure::database::DomainProfileStore;
use crate::utils::error::AppError;

/// Rate gate and identity randomiser for each origin domain. All state lives
/// in the profile store so several instances can share it.
pub struct RateProfileManager {
    store: Arc<dyn DomainProfileStore>,
    default_min_delay_ms: i64,
    default_max_delay_ms: i64,
}

impl RateProfileManager {
    pub fn new(store: Arc<dyn DomainProfileStore>, config: &RateLimitConfig) -> Self {
        Self {
            store,
            default_min_delay_ms: i64::try_from(config.default_min_delay_ms).unwrap_or(i64::MAX),
            default_max_delay_ms: i64::try_from(config.default_max_delay_ms).unwrap_or(i64::MAX),
        }
    }

    /// Existing profile without creating one.
    pub async fn find(&self, domain: &str) -> Result<Option<DomainRateProfile>> {
        self.store.find(&domain.to_ascii_lowercase()).await
    }

    pub async fn get_or_create(&self, domain: &str) -> Result<DomainRateProfile> {
        let domain = domain.to_ascii_lowercase();
        if let Some(profile) = self.store.find(&domain).await? {
            return Ok(profile);
        }

        let profile = DomainRateProfile::with_defaults(
            domain.clone(),
            self.default_min_delay_ms,
            self.default_max_delay_ms,
        );
        let stored = self.store.insert_if_absent(&profile).await?;
        info!(
            "Created rate profile for {} ({}-{} ms)",
            domain, stored.min_delay_ms, stored.max_delay_ms
        );
        Ok(stored)
    }

    pub async fn can_request_now(&self, domain: &str) -> Result<bool> {
        let profile = self.get_or_create(domain).await?;
        Ok(profile.can_request_at(Utc::now()))
    }

    /// Stamps the request and closes the gate for a random delay drawn from
    /// the domain's window.
    pub async fn record_request(&self, domain: &str) -> Result<()> {
        let mut profile = self.get_or_create(domain).await?;
        let now = Utc::now();
        let next_allowed_at = {
            let mut rng = rand::rng();
            profile.record_request_at(now, &mut rng)
        };

        let updated = self
            .store
            .record_request(&profile.domain, now, next_allowed_at)
            .await?;
        if !updated {
            warn!("Rate profile for {} vanished before the request was recorded", profile.domain);
            return Ok(());
        }

        debug!(
            "Recorded request to {}; next allowed in {} ms",
            profile.domain,
            (next_allowed_at - now).num_milliseconds()
        );
        Ok(())
    }

    pub async fn pick_identity(&self, domain: &str) -> Result<Identity> {
        let profile = self.get_or_create(domain).await?;
        self.identity_from(&profile)
    }

    /// Identity drawn from an already loaded profile.
    pub fn identity_from(&self, profile: &DomainRateProfile) -> Result<Identity> {
        let identity = {
            let mut rng = rand::rng();
            profile.pick_identity(&mut rng)
        };
        identity.ok_or_else(|| {
            AppError::InvalidInput(format!("Rate profile for {} has an empty identity pool", profile.domain)).into()
        })
    }

    /// Atomically takes the domain's gate for one request, drawing the delay
    /// from `profile`'s window. `None` when the gate is closed, including when
    /// another dispatcher took it after `profile` was read.
    pub async fn try_acquire(&self, profile: &DomainRateProfile) -> Result<Option<GateClaim>> {
        let now = Utc::now();
        let next_allowed_at = {
            let mut rng = rand::rng();
            now + profile.draw_delay(&mut rng)
        };

        if !self.store.claim_slot(&profile.domain, now, next_allowed_at).await? {
            debug!("Gate for {} is already taken", profile.domain);
            return Ok(None);
        }

        Ok(Some(GateClaim {
            domain: profile.domain.clone(),
            at: now,
            next_allowed_at,
            previous_request_at: profile.last_request_at,
            previous_allowed_at: profile.next_allowed_at,
        }))
    }

    /// Hands back a claim whose request was never sent. A no-op once the
    /// gate has moved on.
    pub async fn release(&self, claim: &GateClaim) -> Result<()> {
        let restored = self
            .store
            .release_slot(
                &claim.domain,
                claim.next_allowed_at,
                claim.previous_request_at,
                claim.previous_allowed_at,
            )
            .await?;
        if !restored {
            debug!("Gate for {} moved on before the claim was released", claim.domain);
        }
        Ok(())
    }
}
