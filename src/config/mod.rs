//! Configuration module for the farecrawl application.
//!
//! This module handles loading and parsing configuration from environment variables
//! using the figment crate. It supports flexible duration parsing that accepts both
//! numeric values (interpreted as seconds) and duration strings with units.

use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Main application configuration containing all sub-configurations
#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    /// Log level for the application
    ///
    /// This value is used to set the log level for this application's target specifically.
    /// e.g. "debug" would be similar to "warn,farecrawl=debug,..."
    ///
    /// Valid values are: "trace", "debug", "info", "warn", "error"
    /// Defaults to "info" if not specified
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Port for the web server (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Postgres connection URL (relational store, component B)
    pub database_url: String,
    /// Redis connection URL (KV + stream broker, component D)
    pub redis_url: String,
    /// Graceful shutdown timeout duration
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    /// Number of cooperative workers draining queues (env `WORKER_CONCURRENCY`)
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    /// Default max attempts for a job before it is moved to the failed set
    #[serde(default = "default_worker_max_retries")]
    pub worker_max_retries: u32,
    /// Delay a worker waits before retrying after a transient error
    #[serde(
        default = "default_worker_retry_delay",
        deserialize_with = "deserialize_duration"
    )]
    pub worker_retry_delay: Duration,
    /// Per-job timeout enforced by the worker
    #[serde(
        default = "default_worker_job_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub worker_job_timeout: Duration,
    /// Time a worker waits for in-flight handlers to finish before abandoning them
    #[serde(
        default = "default_worker_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub worker_shutdown_timeout: Duration,

    /// Run embedded sqlx migrations on startup (env `INIT_SCHEMA`)
    #[serde(default)]
    pub init_schema: bool,
    /// Seed the graph store with the Airport reference table on startup (env `SEED_NEO4J`)
    #[serde(default)]
    pub seed_neo4j: bool,
    /// Toggle additional redacted parser diagnostics logs
    #[serde(default)]
    pub price_graph_diagnostics: bool,

    /// Visibility timeout before an unacked delivery may be reclaimed
    #[serde(
        default = "default_queue_visibility_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub queue_visibility_timeout: Duration,
    /// How long a blocking dequeue waits on the consumer group before returning none
    #[serde(
        default = "default_queue_block_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub queue_block_timeout: Duration,

    /// Base URL of the price-oracle client
    #[serde(default = "default_oracle_base_url")]
    pub oracle_base_url: String,
    /// Per-request timeout against the oracle
    #[serde(
        default = "default_oracle_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub oracle_timeout: Duration,
    /// Requests per minute the oracle client throttles itself to, independent
    /// of the sweep controller's own `rate_limit_millis` pacing
    #[serde(default = "default_oracle_rpm")]
    pub oracle_rpm: u32,

    /// Deal-classification thresholds and baseline parameters
    #[serde(default)]
    pub deal_thresholds: DealThresholds,
    /// Default configuration seeded into the first-ever sweep progress row
    #[serde(default)]
    pub sweep_defaults: SweepDefaults,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_worker_max_retries() -> u32 {
    3
}

fn default_worker_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_worker_job_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_worker_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_queue_visibility_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_queue_block_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_oracle_base_url() -> String {
    "https://oracle.internal/v1".to_string()
}

fn default_oracle_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_oracle_rpm() -> u32 {
    120
}

/// Deal classification thresholds (§4.3). Exposed as configuration rather than
/// constants per the spec's open question on `W`, `N_min`, `T_expire`.
#[derive(Deserialize, Clone, Debug)]
pub struct DealThresholds {
    #[serde(default = "default_error_fare_pct")]
    pub error_fare_pct: f64,
    #[serde(default = "default_amazing_pct")]
    pub amazing_pct: f64,
    #[serde(default = "default_great_pct")]
    pub great_pct: f64,
    #[serde(default = "default_good_pct")]
    pub good_pct: f64,
    /// Baseline window W, in days
    #[serde(default = "default_baseline_window_days")]
    pub baseline_window_days: i64,
    /// Minimum sample count N_min before a price point can be classified
    #[serde(default = "default_baseline_min_count")]
    pub baseline_min_count: i64,
    /// T_expire: days of staleness before an active deal expires
    #[serde(default = "default_deal_expire_days")]
    pub deal_expire_days: i64,
}

impl Default for DealThresholds {
    fn default() -> Self {
        DealThresholds {
            error_fare_pct: default_error_fare_pct(),
            amazing_pct: default_amazing_pct(),
            great_pct: default_great_pct(),
            good_pct: default_good_pct(),
            baseline_window_days: default_baseline_window_days(),
            baseline_min_count: default_baseline_min_count(),
            deal_expire_days: default_deal_expire_days(),
        }
    }
}

fn default_error_fare_pct() -> f64 {
    70.0
}
fn default_amazing_pct() -> f64 {
    40.0
}
fn default_great_pct() -> f64 {
    25.0
}
fn default_good_pct() -> f64 {
    10.0
}
fn default_baseline_window_days() -> i64 {
    30
}
fn default_baseline_min_count() -> i64 {
    5
}
fn default_deal_expire_days() -> i64 {
    14
}

/// Seed values for the first-ever `ContinuousSweepProgress` row.
#[derive(Deserialize, Clone, Debug)]
pub struct SweepDefaults {
    #[serde(default = "default_rate_limit_millis")]
    pub rate_limit_millis: u64,
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
    #[serde(default = "default_window_days_ahead")]
    pub window_days_ahead: i64,
    #[serde(default = "default_window_days_step")]
    pub window_days_step: i64,
}

impl Default for SweepDefaults {
    fn default() -> Self {
        SweepDefaults {
            rate_limit_millis: default_rate_limit_millis(),
            max_concurrent_probes: default_max_concurrent_probes(),
            window_days_ahead: default_window_days_ahead(),
            window_days_step: default_window_days_step(),
        }
    }
}

fn default_rate_limit_millis() -> u64 {
    250
}
fn default_max_concurrent_probes() -> usize {
    4
}
fn default_window_days_ahead() -> i64 {
    365
}
fn default_window_days_step() -> i64 {
    30
}

/// Duration parser configured to handle various time units with seconds as default
///
/// Supports:
/// - Seconds (s) - default unit
/// - Milliseconds (ms)
/// - Minutes (m)
/// - Hours (h)
///
/// Does not support fractions, exponents, or infinity values
/// Allows for whitespace between the number and the time unit
/// Allows for multiple time units to be specified (summed together, e.g "10s 2m" = 120 + 10 = 130 seconds)
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[TimeUnit::Second, TimeUnit::MilliSecond, TimeUnit::Minute])
    .parse_multiple(None)
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::Second)
    .build();

/// Custom deserializer for duration fields that accepts both numeric and string values
///
/// - Unsigned integers (interpreted as seconds)
/// - Signed integers (interpreted as seconds, must be non-negative)
/// - Strings (parsed using the fundu duration parser)
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Visitor;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DURATION_PARSER.parse(value)
                .map_err(|e| {
                    serde::de::Error::custom(format!(
                        "Invalid duration format '{}': {}. Examples: '5' (5 seconds), '3500ms', '30s', '2m', '1.5h'",
                        value, e
                    ))
                })?
                .try_into()
                .map_err(|e| serde::de::Error::custom(format!("Duration conversion error: {}", e)))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value < 0 {
                return Err(serde::de::Error::custom("Duration cannot be negative"));
            }
            Ok(Duration::from_secs(value as u64))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
