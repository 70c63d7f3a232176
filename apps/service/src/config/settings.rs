use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::application::scheduler::frequency::parse_frequency;
use crate::utils::error::AppError;

#[derive(Debug, Deserialize, Clone)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Redis {
    pub url: String,
    /// List the scraping engine consumes commands from.
    pub command_queue: String,
    /// List dedicated to this service's copy of the scrape results.
    pub result_queue: String,
    pub poll_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Dispatch {
    pub enabled: bool,
    pub interval_secs: u64,
    pub max_targets_per_cycle: u32,
    pub max_concurrent_domains: u32,
}

impl Dispatch {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Scheduler {
    /// Re-scrape frequency used when a target carries no usable override.
    pub default_frequency: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimit {
    pub default_min_delay_ms: u64,
    pub default_max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Feedback {
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: Database,
    pub redis: Redis,
    pub server: Server,
    pub dispatch: Dispatch,
    pub scheduler: Scheduler,
    pub rate_limit: RateLimit,
    pub feedback: Feedback,
}

impl AppConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let config_dir = env::var("CONFIG_DIR").unwrap_or_else(|_| "./config".into());

        let s = defaults()
            .and_then(|b| {
                b
                    // Shared settings
                    .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
                    // Add mode-specific settings
                    .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
                    // Add local settings
                    .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
                    // APP_DISPATCH__INTERVAL_SECS=60 -> dispatch.interval_secs
                    .add_source(
                        Environment::with_prefix("APP")
                            .prefix_separator("_")
                            .separator("__")
                            .try_parsing(true),
                    )
                    .build()
            })
            .map_err(config_error)?;

        let config: AppConfig = s.try_deserialize().map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration made of the compiled-in defaults only.
    pub fn from_defaults() -> Result<Self, AppError> {
        let config: AppConfig = defaults()
            .and_then(|b| b.build())
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.dispatch.interval_secs == 0 {
            return Err(AppError::Configuration("dispatch.interval_secs must be positive".into()));
        }
        if self.dispatch.max_targets_per_cycle == 0 {
            return Err(AppError::Configuration("dispatch.max_targets_per_cycle must be positive".into()));
        }
        if self.dispatch.max_concurrent_domains == 0 {
            return Err(AppError::Configuration("dispatch.max_concurrent_domains must be positive".into()));
        }
        if self.rate_limit.default_min_delay_ms > self.rate_limit.default_max_delay_ms {
            return Err(AppError::Configuration(format!(
                "rate_limit.default_min_delay_ms ({}) exceeds rate_limit.default_max_delay_ms ({})",
                self.rate_limit.default_min_delay_ms, self.rate_limit.default_max_delay_ms
            )));
        }
        if parse_frequency(&self.scheduler.default_frequency).is_none() {
            return Err(AppError::Configuration(format!(
                "scheduler.default_frequency is not a valid duration: {}",
                self.scheduler.default_frequency
            )));
        }
        if self.redis.command_queue.trim().is_empty() || self.redis.result_queue.trim().is_empty() {
            return Err(AppError::Configuration("redis queue names must not be empty".into()));
        }
        Ok(())
    }

    /// The validated default frequency.
    pub fn default_frequency(&self) -> chrono::Duration {
        parse_frequency(&self.scheduler.default_frequency)
            .unwrap_or_else(|| chrono::Duration::hours(4))
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("database.url", "postgres://localhost:5432/pricewatch")?
        .set_default("database.max_connections", 10)?
        .set_default("redis.url", "redis://127.0.0.1:6379")?
        .set_default("redis.command_queue", "scrape_commands")?
        .set_default("redis.result_queue", "scrape_results.scheduler")?
        .set_default("redis.poll_timeout_secs", 5)?
        .set_default("server.enabled", true)?
        .set_default("server.address", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("dispatch.enabled", true)?
        .set_default("dispatch.interval_secs", 300)?
        .set_default("dispatch.max_targets_per_cycle", 50)?
        .set_default("dispatch.max_concurrent_domains", 10)?
        .set_default("scheduler.default_frequency", "PT4H")?
        .set_default("rate_limit.default_min_delay_ms", 2000)?
        .set_default("rate_limit.default_max_delay_ms", 8000)?
        .set_default("feedback.enabled", true)
}

fn config_error(err: ConfigError) -> AppError {
    AppError::Configuration(err.to_string())
}
