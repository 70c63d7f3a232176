use anyhow::Result;
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::config::settings::Redis as RedisConfig;
use crate::domain::messages::ScrapeCommand;
use crate::utils::error::AppError;

/// Outbound side: hands commands to the scraping engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish(&self, command: &ScrapeCommand) -> Result<()>;
}

/// A message taken off the result queue and not yet settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub payload: String,
    /// Set when this payload was requeued at least once before.
    pub redelivered: bool,
}

/// Inbound side: at-least-once delivery of scrape results. Every delivery
/// must be settled with exactly one of `ack`, `reject` or `requeue`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultSource: Send + Sync {
    /// Waits up to the poll timeout; `None` means nothing arrived.
    async fn receive(&self) -> Result<Option<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Dead-letters the message; it is never delivered again.
    async fn reject(&self, delivery: &Delivery, reason: &str) -> Result<()>;

    async fn requeue(&self, delivery: &Delivery) -> Result<()>;
}

/// Redis list queues:
/// `queue:{name}` pending, `processing:{name}` in flight,
/// `failed:{name}` dead letters, `redeliveries:{name}` requeue counters.
pub struct RedisQueue {
    pool: Pool,
    command_queue: String,
    result_queue: String,
    poll_timeout_secs: u64,
}

impl RedisQueue {
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let cfg = Config::from_url(&config.url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1))
            .map_err(|e| AppError::Redis(e.to_string()))?;
        
        let queue = Self {
            pool,
            command_queue: config.command_queue.clone(),
            result_queue: config.result_queue.clone(),
            poll_timeout_secs: config.poll_timeout_secs.max(1),
        };

        // Test connection
        queue.ping().await?;

        Ok(queue)
    }
    
    pub async fn get_connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool.get().await.map_err(|e| AppError::Redis(e.to_string()).into())
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.get_connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(AppError::from)?;
        Ok(())
    }

    fn queue_key(name: &str) -> String {
        format!("queue:{}", name)
    }

    fn processing_key(name: &str) -> String {
        format!("processing:{}", name)
    }

    fn failed_key(name: &str) -> String {
        format!("failed:{}", name)
    }

    fn redeliveries_key(name: &str) -> String {
        format!("redeliveries:{}", name)
    }

    /// Moves results stranded in the processing list by a consumer that died
    /// mid-message back onto the queue. Returns how many were moved.
    pub async fn recover_in_flight(&self) -> Result<usize> {
        let mut conn = self.get_connection().await?;
        let queue_key = Self::queue_key(&self.result_queue);
        let processing_key = Self::processing_key(&self.result_queue);

        let mut recovered = 0;
        loop {
            // RPUSH onto the consuming end so recovered messages go first
            let moved: Option<String> = redis::cmd("LMOVE")
                .arg(&processing_key)
                .arg(&queue_key)
                .arg("RIGHT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await
                .map_err(AppError::from)?;
            match moved {
                Some(_) => recovered += 1,
                None => break,
            }
        }

        if recovered > 0 {
            warn!("Recovered {} in-flight results on {}", recovered, self.result_queue);
        }
        Ok(recovered)
    }

    /// Takes `delivery` off the processing list and clears its counter.
    async fn settle(&self, conn: &mut deadpool_redis::Connection, delivery: &Delivery) -> Result<(i32, i32)> {
        let processing_key = Self::processing_key(&self.result_queue);
        let redeliveries_key = Self::redeliveries_key(&self.result_queue);

        let result: (i32, i32) = redis::pipe()
            .atomic()
            .lrem(&processing_key, 1, &delivery.payload)
            .hdel(&redeliveries_key, &delivery.payload)
            .query_async(conn)
            .await
            .map_err(|e| AppError::Redis(format!("Failed to settle delivery: {}", e)))?;

        Ok(result)
    }
}

#[async_trait]
impl CommandPublisher for RedisQueue {
    async fn publish(&self, command: &ScrapeCommand) -> Result<()> {
        let data = serde_json::to_string(command).map_err(AppError::from)?;
        let mut conn = self.get_connection().await?;

        let depth: i64 = conn.lpush(Self::queue_key(&self.command_queue), &data).await
            .map_err(AppError::from)?;

        debug!("Published command for target {} ({} queued)", command.target_id, depth);
        Ok(())
    }
}

#[async_trait]
impl ResultSource for RedisQueue {
    async fn receive(&self) -> Result<Option<Delivery>> {
        let mut conn = self.get_connection().await?;
        let queue_key = Self::queue_key(&self.result_queue);
        let processing_key = Self::processing_key(&self.result_queue);

        // Atomically move to the processing list so a crash mid-message
        // leaves it recoverable
        let payload: Option<String> = conn
            .brpoplpush(&queue_key, &processing_key, self.poll_timeout_secs as f64)
            .await
            .map_err(AppError::from)?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let count: Option<i64> = conn
            .hget(Self::redeliveries_key(&self.result_queue), &payload)
            .await
            .map_err(AppError::from)?;

        debug!("Received result payload ({} bytes)", payload.len());
        Ok(Some(Delivery {
            payload,
            redelivered: count.unwrap_or(0) > 0,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let (removed, _) = self.settle(&mut conn, delivery).await?;
        if removed == 0 {
            debug!("Acked delivery was no longer in {}", Self::processing_key(&self.result_queue));
        }
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, reason: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;

        let dead_letter = serde_json::json!({
            "payload": delivery.payload,
            "error": reason,
            "rejected_at": chrono::Utc::now(),
        })
        .to_string();

        let _: i64 = conn.lpush(Self::failed_key(&self.result_queue), dead_letter).await
            .map_err(AppError::from)?;
        self.settle(&mut conn, delivery).await?;

        info!("Dead-lettered result on {}: {}", self.result_queue, reason);
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let queue_key = Self::queue_key(&self.result_queue);
        let processing_key = Self::processing_key(&self.result_queue);
        let redeliveries_key = Self::redeliveries_key(&self.result_queue);

        // LPUSH puts it behind everything already waiting
        let _: (i64, i64, i64) = redis::pipe()
            .atomic()
            .hincr(&redeliveries_key, &delivery.payload, 1)
            .lpush(&queue_key, &delivery.payload)
            .lrem(&processing_key, 1, &delivery.payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Redis(format!("Failed to requeue delivery: {}", e)))?;

        Ok(())
    }
}
