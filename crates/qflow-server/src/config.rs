//! Application configuration.

use std::time::Duration;

use chrono::NaiveTime;
use qflow_core::{BusinessCalendar, DEFAULT_UTC_OFFSET_MINUTES};
use qflow_engine::{ClosingConfig, NotificationPoolConfig};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Environment prefix for overrides, e.g. `QFLOW__SERVER__BIND_ADDR`.
pub const ENV_PREFIX: &str = "QFLOW";

/// Largest accepted closing window, half a day either side.
pub const MAX_CLOSING_WINDOW_SECS: i64 = 43_200;

/// HTTP and viewer socket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address. Default: 0.0.0.0:8080.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Maximum concurrent viewer sockets. Default: 200.
    #[serde(default = "default_max_ws_connections")]
    pub max_ws_connections: usize,
    /// Events a viewer may fall behind by before it is dropped. Default: 64.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    /// Time allowed for draining notifications on shutdown. Default: 10s.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_ws_connections() -> usize {
    200
}

fn default_subscriber_buffer() -> usize {
    qflow_hub::DEFAULT_SUBSCRIBER_BUFFER
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_ws_connections: default_max_ws_connections(),
            subscriber_buffer: default_subscriber_buffer(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// Local business day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessDayConfig {
    /// Minutes east of UTC. Default: 420 (UTC+07:00).
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
}

fn default_utc_offset_minutes() -> i32 {
    DEFAULT_UTC_OFFSET_MINUTES
}

impl Default for BusinessDayConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: default_utc_offset_minutes(),
        }
    }
}

/// Background loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Closing cycle interval (seconds). Default: 60.
    #[serde(default = "default_closing_interval_secs")]
    pub closing_interval_secs: u64,
    /// Half-width of the closing window (seconds). Default: 60.
    #[serde(default = "default_closing_window_secs")]
    pub closing_window_secs: i64,
    /// Retention sweep interval (seconds). Default: 3600.
    #[serde(default = "default_retention_interval_secs")]
    pub retention_interval_secs: u64,
    /// Days a ticket is kept. Default: 30.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_closing_interval_secs() -> u64 {
    60
}

fn default_closing_window_secs() -> i64 {
    60
}

fn default_retention_interval_secs() -> u64 {
    3600
}

fn default_retention_days() -> u32 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            closing_interval_secs: default_closing_interval_secs(),
            closing_window_secs: default_closing_window_secs(),
            retention_interval_secs: default_retention_interval_secs(),
            retention_days: default_retention_days(),
        }
    }
}

/// Notification worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Per-delivery timeout (ms). Default: 10,000.
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_delivery_timeout_ms() -> u64 {
    10_000
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
        }
    }
}

/// Persistence. Without a URL the in-memory store is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// A bearer token accepted by the static verifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub student_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedTopic {
    pub code: String,
    pub name_th: String,
    pub name_en: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedCounter {
    pub label: String,
    /// Local closing time, `HH:MM` or `HH:MM:SS`.
    pub closes_at: String,
    #[serde(default = "default_open")]
    pub open: bool,
    /// Codes of the topics this counter serves.
    #[serde(default)]
    pub topics: Vec<String>,
}

fn default_open() -> bool {
    true
}

impl SeedCounter {
    pub fn closing_time(&self) -> AppResult<NaiveTime> {
        NaiveTime::parse_from_str(&self.closes_at, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&self.closes_at, "%H:%M"))
            .map_err(|e| {
                AppError::Config(format!(
                    "counter {}: invalid closes_at {:?}: {e}",
                    self.label, self.closes_at
                ))
            })
    }
}

/// Topics and counters created at startup when the store is empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub topics: Vec<SeedTopic>,
    #[serde(default)]
    pub counters: Vec<SeedCounter>,
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub business_day: BusinessDayConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub seed: SeedConfig,
}

impl AppConfig {
    /// Load from an optional TOML file, then apply `QFLOW__*` environment
    /// overrides.
    pub fn load(path: &str) -> AppResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::Config(format!("Failed to load config: {e}")))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text without environment overrides.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.scheduler.closing_interval_secs == 0 || self.scheduler.retention_interval_secs == 0 {
            return Err(AppError::Config(
                "scheduler intervals must be positive".to_string(),
            ));
        }
        if !(0..=MAX_CLOSING_WINDOW_SECS).contains(&self.scheduler.closing_window_secs) {
            return Err(AppError::Config(format!(
                "scheduler.closing_window_secs must be between 0 and {MAX_CLOSING_WINDOW_SECS}"
            )));
        }
        if self.server.max_ws_connections == 0 {
            return Err(AppError::Config(
                "server.max_ws_connections must be positive".to_string(),
            ));
        }
        self.calendar()?;
        for counter in &self.seed.counters {
            counter.closing_time()?;
        }
        Ok(())
    }

    pub fn calendar(&self) -> AppResult<BusinessCalendar> {
        BusinessCalendar::from_offset_minutes(self.business_day.utc_offset_minutes)
            .map_err(|e| AppError::Config(e.to_string()))
    }

    pub fn closing(&self) -> ClosingConfig {
        ClosingConfig {
            interval: Duration::from_secs(self.scheduler.closing_interval_secs),
            window: chrono::Duration::seconds(self.scheduler.closing_window_secs),
        }
    }

    pub fn notification_pool(&self) -> NotificationPoolConfig {
        NotificationPoolConfig {
            workers: self.notifications.workers,
            queue_capacity: self.notifications.queue_capacity,
            delivery_timeout: Duration::from_millis(self.notifications.delivery_timeout_ms),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}
