use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::application::rate_profile::service::RateProfileManager;
use crate::application::scheduler::service::SchedulerService;
use crate::config::settings::Dispatch as DispatchConfig;
use crate::domain::messages::ScrapeCommand;
use crate::domain::scrape_target::ScrapeTarget;
use crate::infrastructure::queue::CommandPublisher;

/// What happened to a single due target in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOutcome {
    Dispatched,
    /// Published, but the schedule write failed; the target stays due.
    Unscheduled,
    RateGated,
    MissingConfig,
    Failed,
}

/// Tally of one dispatch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub due: usize,
    pub domains_selected: usize,
    pub domains_deferred: usize,
    pub dispatched: usize,
    pub unscheduled: usize,
    pub rate_gated: usize,
    pub missing_config: usize,
    pub failed: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: TargetOutcome) {
        match outcome {
            TargetOutcome::Dispatched => self.dispatched += 1,
            TargetOutcome::Unscheduled => self.unscheduled += 1,
            TargetOutcome::RateGated => self.rate_gated += 1,
            TargetOutcome::MissingConfig => self.missing_config += 1,
            TargetOutcome::Failed => self.failed += 1,
        }
    }
}

/// Splits due targets into per-domain buckets. Buckets keep the order of
/// their first (longest-waiting) target, and targets keep their order inside
/// a bucket.
pub fn group_by_domain(targets: Vec<ScrapeTarget>) -> Vec<(String, Vec<ScrapeTarget>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<ScrapeTarget>)> = Vec::new();

    for target in targets {
        let domain = target.domain();
        match index.get(&domain) {
            Some(&i) => groups[i].1.push(target),
            None => {
                index.insert(domain.clone(), groups.len());
                groups.push((domain, vec![target]));
            }
        }
    }

    groups
}

/// Periodically publishes scrape commands for due targets, one request at a
/// time per domain and several domains in parallel.
pub struct DispatchService {
    scheduler: Arc<SchedulerService>,
    profiles: Arc<RateProfileManager>,
    publisher: Arc<dyn CommandPublisher>,
    config: DispatchConfig,
}

impl DispatchService {
    pub fn new(
        scheduler: Arc<SchedulerService>,
        profiles: Arc<RateProfileManager>,
        publisher: Arc<dyn CommandPublisher>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            scheduler,
            profiles,
            publisher,
            config,
        }
    }

    /// Delay-then-repeat loop. A running cycle always completes; shutdown is
    /// only observed between cycles.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        if !self.config.enabled {
            info!("Dispatch loop is disabled");
            return Ok(());
        }

        info!(
            "Starting dispatch loop (every {}s, {} targets, {} domains per cycle)",
            self.config.interval_secs, self.config.max_targets_per_cycle, self.config.max_concurrent_domains
        );

        while !shutdown.is_cancelled() {
            match self.run_cycle().await {
                Ok(report) => info!(
                    due = report.due,
                    domains = report.domains_selected,
                    deferred_domains = report.domains_deferred,
                    dispatched = report.dispatched,
                    unscheduled = report.unscheduled,
                    rate_gated = report.rate_gated,
                    missing_config = report.missing_config,
                    failed = report.failed,
                    "Dispatch cycle finished"
                ),
                Err(e) => error!("Dispatch cycle aborted, could not load due targets: {:#}", e),
            }

            tokio::select! {
                _ = sleep(self.config.interval()) => {}
                _ = shutdown.cancelled() => {}
            }
        }

        info!("Dispatch loop stopped");
        Ok(())
    }

    /// One pass. Fails only when the due targets cannot be loaded.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let due = self
            .scheduler
            .due_targets(self.config.max_targets_per_cycle)
            .await?;

        let mut report = CycleReport {
            due: due.len(),
            ..CycleReport::default()
        };
        if due.is_empty() {
            debug!("No targets due");
            return Ok(report);
        }

        let mut groups = group_by_domain(due);
        let cap = self.config.max_concurrent_domains as usize;
        if groups.len() > cap {
            let deferred = groups.split_off(cap);
            report.domains_deferred = deferred.len();
            debug!(
                "Deferring {} domains to the next cycle: {:?}",
                deferred.len(),
                deferred.iter().map(|(d, _)| d.as_str()).collect::<Vec<_>>()
            );
        }
        report.domains_selected = groups.len();

        let outcomes = join_all(
            groups
                .into_iter()
                .map(|(domain, targets)| self.process_domain(domain, targets)),
        )
        .await;

        for outcome in outcomes.into_iter().flatten() {
            report.record(outcome);
        }
        Ok(report)
    }

    /// Targets of one domain, strictly one after another.
    pub async fn process_domain(&self, domain: String, targets: Vec<ScrapeTarget>) -> Vec<TargetOutcome> {
        let mut outcomes = Vec::with_capacity(targets.len());
        for target in &targets {
            let span = info_span!("dispatch", domain = %domain, target_id = %target.id);
            let outcome = match self.process_target(&domain, target).instrument(span).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Error dispatching target {} on {}: {:#}", target.id, domain, e);
                    TargetOutcome::Failed
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn process_target(&self, domain: &str, target: &ScrapeTarget) -> Result<TargetOutcome> {
        let profile = self.profiles.get_or_create(domain).await?;
        if !profile.can_request_at(Utc::now()) {
            debug!("Domain {} is rate gated, leaving target {} due", domain, target.id);
            return Ok(TargetOutcome::RateGated);
        }

        let Some(site_config) = target.site_config.as_ref() else {
            warn!(
                "Target {} ({}) has no site configuration; it stays due until one is assigned",
                target.id, target.url
            );
            return Ok(TargetOutcome::MissingConfig);
        };

        let identity = self.profiles.identity_from(&profile)?;
        let Some(claim) = self.profiles.try_acquire(&profile).await? else {
            debug!("Domain {} was taken by another dispatcher, leaving target {} due", domain, target.id);
            return Ok(TargetOutcome::RateGated);
        };
        let command = ScrapeCommand::new(target, site_config.selectors.clone(), identity, claim.at);

        // Schedule stays untouched on publish failure so the target is retried next cycle
        if let Err(e) = self.publisher.publish(&command).await {
            if let Err(release_err) = self.profiles.release(&claim).await {
                error!("Could not hand back the gate for {}: {:#}", domain, release_err);
            }
            return Err(e);
        }

        match self.scheduler.advance_after_dispatch(target, command.dispatched_at).await {
            Ok(_) => {
                debug!("Dispatched target {} with {}", target.id, command.header_profile);
                Ok(TargetOutcome::Dispatched)
            }
            Err(e) => {
                error!(
                    "Target {} was published but its schedule was not advanced: {:#}",
                    target.id, e
                );
                Ok(TargetOutcome::Unscheduled)
            }
        }
    }
}
