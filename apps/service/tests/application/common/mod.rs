use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use scrape_orchestrator::application::dispatch::service::DispatchService;
use scrape_orchestrator::application::rate_profile::service::RateProfileManager;
use scrape_orchestrator::application::scheduler::service::SchedulerService;
use scrape_orchestrator::config::settings::{Dispatch, RateLimit};
use scrape_orchestrator::domain::domain_profile::DomainRateProfile;
use scrape_orchestrator::domain::messages::ScrapeCommand;
use scrape_orchestrator::domain::scrape_target::{ScrapeTarget, SiteConfig};
use scrape_orchestrator::infrastructure::database::{DomainProfileStore, TargetStore};
use scrape_orchestrator::infrastructure::queue::{CommandPublisher, Delivery, ResultSource};

/// Ordered record of side effects across all fakes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Published(Uuid),
    RequestRecorded(String),
    ScheduleWritten(Uuid),
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

pub fn target(url: &str) -> ScrapeTarget {
    let mut target = ScrapeTarget::new(Uuid::new_v4(), "acme", url);
    target.site_config = Some(SiteConfig {
        id: Uuid::new_v4(),
        selectors: json!({"price": ".price", "stock": ".availability"}),
    });
    target
}

#[derive(Default)]
pub struct InMemoryTargetStore {
    targets: Mutex<HashMap<Uuid, ScrapeTarget>>,
    events: EventLog,
}

impl InMemoryTargetStore {
    pub fn with_events(events: EventLog) -> Self {
        Self {
            targets: Mutex::default(),
            events,
        }
    }

    pub fn insert(&self, target: ScrapeTarget) {
        self.targets.lock().unwrap().insert(target.id, target);
    }

    pub fn get(&self, id: Uuid) -> ScrapeTarget {
        self.targets.lock().unwrap()[&id].clone()
    }
}

#[async_trait]
impl TargetStore for InMemoryTargetStore {
    async fn due_targets(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ScrapeTarget>> {
        let mut due: Vec<ScrapeTarget> = self
            .targets
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.is_due_at(now))
            .cloned()
            .collect();
        // None sorts before Some, matching NULLS FIRST
        due.sort_by_key(|t| (t.next_scrape, t.id));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn find(&self, id: Uuid) -> Result<Option<ScrapeTarget>> {
        Ok(self.targets.lock().unwrap().get(&id).cloned())
    }

    async fn write_schedule(
        &self,
        id: Uuid,
        last_scraped: Option<DateTime<Utc>>,
        next_scrape: DateTime<Utc>,
    ) -> Result<bool> {
        let mut targets = self.targets.lock().unwrap();
        let Some(target) = targets.get_mut(&id) else {
            return Ok(false);
        };
        if last_scraped.is_some() {
            target.last_scraped = last_scraped;
        }
        target.next_scrape = Some(next_scrape);
        self.events.lock().unwrap().push(Event::ScheduleWritten(id));
        Ok(true)
    }

    async fn advance_schedule(
        &self,
        id: Uuid,
        expected_next: Option<DateTime<Utc>>,
        last_scraped: DateTime<Utc>,
        next_scrape: DateTime<Utc>,
    ) -> Result<bool> {
        let mut targets = self.targets.lock().unwrap();
        let Some(target) = targets.get_mut(&id) else {
            return Ok(false);
        };
        if target.next_scrape != expected_next {
            return Ok(false);
        }
        target.last_scraped = Some(last_scraped);
        target.next_scrape = Some(next_scrape);
        self.events.lock().unwrap().push(Event::ScheduleWritten(id));
        Ok(true)
    }
}

#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: Mutex<HashMap<String, DomainRateProfile>>,
    events: EventLog,
}

impl InMemoryProfileStore {
    pub fn with_events(events: EventLog) -> Self {
        Self {
            profiles: Mutex::default(),
            events,
        }
    }

    pub fn get(&self, domain: &str) -> Option<DomainRateProfile> {
        self.profiles.lock().unwrap().get(domain).cloned()
    }

    pub fn count(&self) -> usize {
        self.profiles.lock().unwrap().len()
    }
}

#[async_trait]
impl DomainProfileStore for InMemoryProfileStore {
    async fn find(&self, domain: &str) -> Result<Option<DomainRateProfile>> {
        let found = self.get(domain);
        // Concurrent callers get to act on the same snapshot
        tokio::task::yield_now().await;
        Ok(found)
    }

    async fn insert_if_absent(&self, profile: &DomainRateProfile) -> Result<DomainRateProfile> {
        let mut profiles = self.profiles.lock().unwrap();
        Ok(profiles
            .entry(profile.domain.clone())
            .or_insert_with(|| profile.clone())
            .clone())
    }

    async fn record_request(
        &self,
        domain: &str,
        at: DateTime<Utc>,
        next_allowed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut profiles = self.profiles.lock().unwrap();
        let Some(profile) = profiles.get_mut(domain) else {
            return Ok(false);
        };
        profile.last_request_at = Some(at);
        profile.next_allowed_at = Some(next_allowed_at);
        self.events
            .lock()
            .unwrap()
            .push(Event::RequestRecorded(domain.to_string()));
        Ok(true)
    }

    async fn claim_slot(
        &self,
        domain: &str,
        at: DateTime<Utc>,
        next_allowed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut profiles = self.profiles.lock().unwrap();
        let Some(profile) = profiles.get_mut(domain) else {
            return Ok(false);
        };
        if !profile.can_request_at(at) {
            return Ok(false);
        }
        profile.last_request_at = Some(at);
        profile.next_allowed_at = Some(next_allowed_at);
        self.events
            .lock()
            .unwrap()
            .push(Event::RequestRecorded(domain.to_string()));
        Ok(true)
    }

    async fn release_slot(
        &self,
        domain: &str,
        claimed_until: DateTime<Utc>,
        previous_request_at: Option<DateTime<Utc>>,
        previous_allowed_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut profiles = self.profiles.lock().unwrap();
        let Some(profile) = profiles.get_mut(domain) else {
            return Ok(false);
        };
        if profile.next_allowed_at != Some(claimed_until) {
            return Ok(false);
        }
        profile.last_request_at = previous_request_at;
        profile.next_allowed_at = previous_allowed_at;
        Ok(true)
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    commands: Mutex<Vec<ScrapeCommand>>,
    fail_for: Mutex<Vec<Uuid>>,
    events: EventLog,
}

impl RecordingPublisher {
    pub fn with_events(events: EventLog) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    pub fn fail_for(&self, id: Uuid) {
        self.fail_for.lock().unwrap().push(id);
    }

    pub fn published(&self) -> Vec<ScrapeCommand> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandPublisher for RecordingPublisher {
    async fn publish(&self, command: &ScrapeCommand) -> Result<()> {
        if self.fail_for.lock().unwrap().contains(&command.target_id) {
            return Err(anyhow!("broker unavailable"));
        }
        // Yield so concurrently processed domains genuinely interleave
        tokio::task::yield_now().await;
        self.commands.lock().unwrap().push(command.clone());
        self.events
            .lock()
            .unwrap()
            .push(Event::Published(command.target_id));
        Ok(())
    }
}

/// Result queue that cancels `shutdown` once it runs dry.
pub struct InMemoryResultSource {
    pending: Mutex<VecDeque<Delivery>>,
    pub acked: Mutex<Vec<String>>,
    pub rejected: Mutex<Vec<(String, String)>>,
    pub requeued: Mutex<Vec<String>>,
    shutdown: CancellationToken,
}

impl InMemoryResultSource {
    pub fn new(payloads: &[String], shutdown: CancellationToken) -> Self {
        Self {
            pending: Mutex::new(
                payloads
                    .iter()
                    .map(|p| Delivery {
                        payload: p.clone(),
                        redelivered: false,
                    })
                    .collect(),
            ),
            acked: Mutex::default(),
            rejected: Mutex::default(),
            requeued: Mutex::default(),
            shutdown,
        }
    }
}

#[async_trait]
impl ResultSource for InMemoryResultSource {
    async fn receive(&self) -> Result<Option<Delivery>> {
        let next = self.pending.lock().unwrap().pop_front();
        if next.is_none() {
            self.shutdown.cancel();
        }
        Ok(next)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.acked.lock().unwrap().push(delivery.payload.clone());
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, reason: &str) -> Result<()> {
        self.rejected
            .lock()
            .unwrap()
            .push((delivery.payload.clone(), reason.to_string()));
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> Result<()> {
        self.requeued.lock().unwrap().push(delivery.payload.clone());
        self.pending.lock().unwrap().push_back(Delivery {
            payload: delivery.payload.clone(),
            redelivered: true,
        });
        Ok(())
    }
}

/// Dispatch pipeline over in-memory fakes sharing one event log.
pub struct Harness {
    pub events: EventLog,
    pub targets: Arc<InMemoryTargetStore>,
    pub profiles: Arc<InMemoryProfileStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub scheduler: Arc<SchedulerService>,
    pub manager: Arc<RateProfileManager>,
    pub dispatch: DispatchService,
    rate_limit: RateLimit,
}

impl Harness {
    pub fn new(min_delay_ms: u64, max_delay_ms: u64, max_concurrent_domains: u32) -> Self {
        let events: EventLog = Arc::default();
        let targets = Arc::new(InMemoryTargetStore::with_events(events.clone()));
        let profiles = Arc::new(InMemoryProfileStore::with_events(events.clone()));
        let publisher = Arc::new(RecordingPublisher::with_events(events.clone()));

        let scheduler = Arc::new(SchedulerService::new(targets.clone(), Duration::hours(4)));
        let rate_limit = RateLimit {
            default_min_delay_ms: min_delay_ms,
            default_max_delay_ms: max_delay_ms,
        };
        let manager = Arc::new(RateProfileManager::new(profiles.clone(), &rate_limit));
        let dispatch = DispatchService::new(
            scheduler.clone(),
            manager.clone(),
            publisher.clone(),
            dispatch_config(max_concurrent_domains),
        );

        Self {
            events,
            targets,
            profiles,
            publisher,
            scheduler,
            manager,
            dispatch,
            rate_limit,
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Another service instance over the same stores, publishing to `publisher`.
    pub fn instance(&self, publisher: Arc<dyn CommandPublisher>) -> DispatchService {
        let scheduler = Arc::new(SchedulerService::new(self.targets.clone(), Duration::hours(4)));
        let manager = Arc::new(RateProfileManager::new(self.profiles.clone(), &self.rate_limit));
        DispatchService::new(scheduler, manager, publisher, dispatch_config(10))
    }
}

pub fn dispatch_config(max_concurrent_domains: u32) -> Dispatch {
    Dispatch {
        enabled: true,
        interval_secs: 300,
        max_targets_per_cycle: 50,
        max_concurrent_domains,
    }
}
