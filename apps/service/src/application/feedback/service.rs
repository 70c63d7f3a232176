use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::application::feedback::backoff::next_retry_at;
use crate::application::scheduler::service::SchedulerService;
use crate::domain::messages::ScrapeResult;
use crate::infrastructure::queue::{Delivery, ResultSource};

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// How a delivery is settled with the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
    Reject(String),
}

/// Consumes scrape results and pushes failed targets back by a
/// classification-dependent delay.
pub struct FeedbackService {
    scheduler: Arc<SchedulerService>,
    source: Arc<dyn ResultSource>,
}

impl FeedbackService {
    pub fn new(scheduler: Arc<SchedulerService>, source: Arc<dyn ResultSource>) -> Self {
        Self { scheduler, source }
    }

    /// Runs until `shutdown` fires. A message already received is processed
    /// and settled before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting result feedback loop");

        while !shutdown.is_cancelled() {
            match self.source.receive().await {
                Ok(Some(delivery)) => {
                    let disposition = self.handle(&delivery).await;
                    if let Err(e) = self.settle(&delivery, &disposition).await {
                        error!("Error settling result delivery ({:?}): {}", disposition, e);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Error receiving scrape result: {}", e);
                    tokio::select! {
                        _ = sleep(RECEIVE_ERROR_BACKOFF) => {}
                        _ = shutdown.cancelled() => {}
                    }
                }
            }
        }

        info!("Result feedback loop stopped");
        Ok(())
    }

    /// Decides what to do with one delivery, applying any schedule change.
    pub async fn handle(&self, delivery: &Delivery) -> Disposition {
        let result: ScrapeResult = match serde_json::from_str(&delivery.payload) {
            Ok(result) => result,
            Err(e) => {
                warn!("Rejecting malformed scrape result: {}", e);
                return Disposition::Reject(format!("malformed payload: {}", e));
            }
        };

        let span = info_span!("scrape_result", target_id = %result.target_id, success = result.success);
        match self.process(&result).instrument(span).await {
            Ok(()) => Disposition::Ack,
            Err(e) if !delivery.redelivered => {
                warn!("Requeueing result for target {}: {}", result.target_id, e);
                Disposition::Requeue
            }
            Err(e) => {
                error!("Giving up on result for target {} after redelivery: {}", result.target_id, e);
                Disposition::Reject(e.to_string())
            }
        }
    }

    /// Successful results need nothing: the dispatch already advanced the
    /// schedule. Failures overwrite `next_scrape` and leave `last_scraped`.
    pub async fn process(&self, result: &ScrapeResult) -> Result<()> {
        let Some((class, retry_at)) = next_retry_at(result) else {
            debug!("Scrape of target {} succeeded", result.target_id);
            return Ok(());
        };

        info!(
            "Scrape of target {} failed ({:?}, code {:?}, status {:?}); retrying at {}",
            result.target_id, class, result.error_code, result.http_status, retry_at
        );
        self.scheduler
            .update_schedule(result.target_id, None, Some(retry_at))
            .await
    }

    async fn settle(&self, delivery: &Delivery, disposition: &Disposition) -> Result<()> {
        match disposition {
            Disposition::Ack => self.source.ack(delivery).await,
            Disposition::Requeue => self.source.requeue(delivery).await,
            Disposition::Reject(reason) => self.source.reject(delivery, reason).await,
        }
    }
}
