use chrono::{DateTime, Days, Local, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::models::WireFormat;
use crate::rabbitmq::RabbitMQConfig;

/// Configuration errors raised while reading the environment
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Invalid session time for {key}: {value} (expected HH:MM:SS)")]
    InvalidSessionTime { key: &'static str, value: String },
}

/// Read an environment variable, falling back to `default` when unset or unparsable
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Ingestion and overflow queue sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_ingest_capacity")]
    pub ingest_capacity: usize,

    /// Sized so overflow can absorb a multi-minute transport outage
    #[serde(default = "default_overflow_capacity")]
    pub overflow_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            ingest_capacity: default_ingest_capacity(),
            overflow_capacity: default_overflow_capacity(),
        }
    }
}

impl QueueConfig {
    pub fn with_env_config() -> Self {
        Self {
            ingest_capacity: env_or("INGEST_QUEUE_CAPACITY", default_ingest_capacity()),
            overflow_capacity: env_or("OVERFLOW_QUEUE_CAPACITY", default_overflow_capacity()),
        }
    }
}

/// Distribution loop behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Sleep when an iteration made no progress
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,

    /// Maximum overflow ticks sent per iteration; 0 drains to exhaustion
    #[serde(default = "default_overflow_drain_limit")]
    pub overflow_drain_limit: usize,

    /// Payload format for outgoing ticks
    #[serde(default = "default_wire_format")]
    pub wire_format: WireFormat,

    /// Log a progress line every N published ticks
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            idle_sleep_ms: default_idle_sleep_ms(),
            overflow_drain_limit: default_overflow_drain_limit(),
            wire_format: default_wire_format(),
            progress_every: default_progress_every(),
        }
    }
}

impl LoopConfig {
    pub fn with_env_config() -> Result<Self, ConfigError> {
        let wire_format = match std::env::var("WIRE_FORMAT") {
            Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "WIRE_FORMAT",
                value,
            })?,
            Err(_) => default_wire_format(),
        };

        Ok(Self {
            idle_sleep_ms: env_or("LOOP_IDLE_SLEEP_MS", default_idle_sleep_ms()),
            overflow_drain_limit: env_or("OVERFLOW_DRAIN_LIMIT", default_overflow_drain_limit()),
            wire_format,
            progress_every: env_or("PROGRESS_LOG_EVERY", default_progress_every()),
        })
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

/// Trading session end times used to compute the loop's wall-clock cutoff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_day_end")]
    pub day_end: NaiveTime,

    #[serde(default = "default_night_end")]
    pub night_end: NaiveTime,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            day_end: default_day_end(),
            night_end: default_night_end(),
        }
    }
}

impl SessionConfig {
    pub fn with_env_config() -> Result<Self, ConfigError> {
        Ok(Self {
            day_end: session_time_from_env("SESSION_DAY_END", default_day_end())?,
            night_end: session_time_from_env("SESSION_NIGHT_END", default_night_end())?,
        })
    }

    /// Wall-clock cutoff for a process started at `now`
    pub fn cutoff(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        let naive = session_cutoff(now.naive_local(), self.day_end, self.night_end)?;
        Local.from_local_datetime(&naive).earliest()
    }
}

fn session_time_from_env(key: &'static str, default: NaiveTime) -> Result<NaiveTime, ConfigError> {
    match std::env::var(key) {
        Ok(value) => NaiveTime::parse_from_str(value.trim(), "%H:%M:%S")
            .map_err(|_| ConfigError::InvalidSessionTime { key, value }),
        Err(_) => Ok(default),
    }
}

/// Compute the exit time of the current session
///
/// The day session ends five minutes after `day_end` (seconds zeroed). A
/// process started after that belongs to the night session, which ends the
/// next calendar day at `night_end` with seconds set to 59.
pub fn session_cutoff(
    now: NaiveDateTime,
    day_end: NaiveTime,
    night_end: NaiveTime,
) -> Option<NaiveDateTime> {
    let day_exit = now
        .date()
        .and_time(NaiveTime::from_hms_opt(day_end.hour(), day_end.minute(), 0)?)
        + chrono::Duration::minutes(5);

    if now <= day_exit {
        return Some(day_exit);
    }

    let tomorrow = now.date().checked_add_days(Days::new(1))?;
    let night_exit = NaiveTime::from_hms_opt(night_end.hour(), night_end.minute(), 59)?;
    Some(tomorrow.and_time(night_exit))
}

/// Which transport backend carries envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Tcp,
    RabbitMq,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "rabbitmq" | "amqp" => Ok(TransportKind::RabbitMq),
            other => Err(format!("unknown transport: {}", other)),
        }
    }
}

/// Pub/sub transport settings shared by publisher and subscriber
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_transport_kind")]
    pub kind: TransportKind,

    /// Address the publisher binds
    #[serde(default = "default_publish_endpoint")]
    pub publish_endpoint: String,

    /// Address the subscriber connects to
    #[serde(default = "default_subscribe_endpoint")]
    pub subscribe_endpoint: String,

    /// Upper bound on a single send; 0 fails immediately when the queue is full
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Outstanding unsent envelopes before sends start failing
    #[serde(default = "default_send_hwm")]
    pub send_hwm: usize,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Pause after bind so early subscribers can connect before the first send
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Initial reconnect delay for subscribers
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: default_transport_kind(),
            publish_endpoint: default_publish_endpoint(),
            subscribe_endpoint: default_subscribe_endpoint(),
            send_timeout_ms: default_send_timeout_ms(),
            send_hwm: default_send_hwm(),
            max_frame_bytes: default_max_frame_bytes(),
            settle_ms: default_settle_ms(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

impl TransportConfig {
    pub fn with_env_config() -> Result<Self, ConfigError> {
        let kind = match std::env::var("TRANSPORT_KIND") {
            Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "TRANSPORT_KIND",
                value,
            })?,
            Err(_) => default_transport_kind(),
        };

        Ok(Self {
            kind,
            publish_endpoint: std::env::var("PUBLISH_ENDPOINT")
                .unwrap_or_else(|_| default_publish_endpoint()),
            subscribe_endpoint: std::env::var("SUBSCRIBE_ENDPOINT")
                .unwrap_or_else(|_| default_subscribe_endpoint()),
            send_timeout_ms: env_or("SEND_TIMEOUT_MS", default_send_timeout_ms()),
            send_hwm: env_or("SEND_HWM", default_send_hwm()),
            max_frame_bytes: env_or("MAX_FRAME_BYTES", default_max_frame_bytes()),
            settle_ms: env_or("PUBLISH_SETTLE_MS", default_settle_ms()),
            reconnect_initial_ms: env_or("RECONNECT_INITIAL_MS", default_reconnect_initial_ms()),
            reconnect_max_ms: env_or("RECONNECT_MAX_MS", default_reconnect_max_ms()),
        })
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Subscriber-side batching and failed-flush policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Flush as soon as the buffer holds this many ticks
    #[serde(default = "default_batch_capacity")]
    pub capacity: usize,

    /// Flush a non-empty buffer once this long has passed since the last flush
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// Attempts per batch before it is dead-lettered
    #[serde(default = "default_flush_max_retries")]
    pub max_retries: u32,

    /// Failed batches held for retry; older ones are dead-lettered first
    #[serde(default = "default_pending_limit")]
    pub pending_limit: usize,

    /// Spool directory for batches that could not be persisted
    #[serde(default)]
    pub dead_letter_dir: Option<PathBuf>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            capacity: default_batch_capacity(),
            flush_interval_secs: default_flush_interval_secs(),
            max_retries: default_flush_max_retries(),
            pending_limit: default_pending_limit(),
            dead_letter_dir: None,
        }
    }
}

impl BatchConfig {
    pub fn with_env_config() -> Self {
        Self {
            capacity: env_or("BATCH_CAPACITY", default_batch_capacity()).max(1),
            flush_interval_secs: env_or("BATCH_FLUSH_INTERVAL_SECS", default_flush_interval_secs()),
            max_retries: env_or("FLUSH_MAX_RETRIES", default_flush_max_retries()),
            pending_limit: env_or("FLUSH_PENDING_LIMIT", default_pending_limit()),
            dead_letter_dir: std::env::var("DEAD_LETTER_DIR").ok().map(PathBuf::from),
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

/// Everything the publishing process needs
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    pub queue: QueueConfig,
    pub distribution: LoopConfig,
    pub session: SessionConfig,
    pub transport: TransportConfig,
    pub rabbitmq: RabbitMQConfig,
    pub api_addr: String,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            queue: QueueConfig::with_env_config(),
            distribution: LoopConfig::with_env_config()?,
            session: SessionConfig::with_env_config()?,
            transport: TransportConfig::with_env_config()?,
            rabbitmq: RabbitMQConfig::with_env_config(),
            api_addr: std::env::var("STATS_API_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string()),
        })
    }
}

/// Everything the recording process needs
#[derive(Debug, Clone, Default)]
pub struct RecorderConfig {
    pub transport: TransportConfig,
    pub rabbitmq: RabbitMQConfig,
    pub batch: BatchConfig,
    pub database_url: Option<String>,
    pub db_pool_size: u32,
    pub api_addr: String,
}

impl RecorderConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            transport: TransportConfig::with_env_config()?,
            rabbitmq: RabbitMQConfig::with_env_config(),
            batch: BatchConfig::with_env_config(),
            database_url: std::env::var("TIMESCALEDB_URL").ok(),
            db_pool_size: env_or("DB_POOL_MAX_SIZE", 10),
            api_addr: std::env::var("STATS_API_ADDR").unwrap_or_else(|_| "127.0.0.1:3001".to_string()),
        })
    }
}

// Default value functions for serde
fn default_ingest_capacity() -> usize {
    10_000
}

fn default_overflow_capacity() -> usize {
    500_000
}

fn default_idle_sleep_ms() -> u64 {
    1
}

fn default_overflow_drain_limit() -> usize {
    1_024
}

fn default_wire_format() -> WireFormat {
    WireFormat::Binary
}

fn default_progress_every() -> u64 {
    1_000
}

fn default_day_end() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 0, 0).unwrap_or_default()
}

fn default_night_end() -> NaiveTime {
    NaiveTime::from_hms_opt(2, 30, 0).unwrap_or_default()
}

fn default_transport_kind() -> TransportKind {
    TransportKind::Tcp
}

fn default_publish_endpoint() -> String {
    "0.0.0.0:9999".to_string()
}

fn default_subscribe_endpoint() -> String {
    "127.0.0.1:9999".to_string()
}

fn default_send_timeout_ms() -> u64 {
    100
}

fn default_send_hwm() -> usize {
    100_000
}

fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_settle_ms() -> u64 {
    100
}

fn default_reconnect_initial_ms() -> u64 {
    100
}

fn default_reconnect_max_ms() -> u64 {
    5_000
}

fn default_batch_capacity() -> usize {
    1_000
}

fn default_flush_interval_secs() -> u64 {
    30
}

fn default_flush_max_retries() -> u32 {
    3
}

fn default_pending_limit() -> usize {
    16
}
