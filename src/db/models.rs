//! Relational row types (component B, §3). All rows map 1:1 onto a table in
//! `migrations/0001_init.sql` via `sqlx::FromRow`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Airport {
    pub iata: String,
    pub name: String,
    pub city: String,
    pub country: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Airline {
    pub code: String,
    pub name: String,
    pub country: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, TS)]
#[ts(export)]
pub struct ScheduledJob {
    #[ts(type = "string")]
    pub id: Uuid,
    pub name: String,
    pub cron_expression: String,
    pub enabled: bool,
    #[ts(type = "string | null")]
    pub last_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, TS)]
#[ts(export)]
pub struct JobDetails {
    #[ts(type = "string")]
    pub scheduled_job_id: Uuid,
    #[ts(type = "unknown")]
    pub origins: Value,
    #[ts(type = "unknown")]
    pub destinations: Value,
    #[ts(type = "string")]
    pub date_window_start: NaiveDate,
    #[ts(type = "string")]
    pub date_window_end: NaiveDate,
    pub trip_length_days: i32,
    pub travelers: i32,
    pub cabin: String,
    pub stops: Option<i32>,
    pub currency: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, TS)]
#[ts(export)]
pub struct SearchQuery {
    #[ts(type = "string")]
    pub id: Uuid,
    pub origin: String,
    pub destination: String,
    #[ts(type = "string")]
    pub departure_date: NaiveDate,
    #[ts(type = "string | null")]
    pub return_date: Option<NaiveDate>,
    pub trip_length_days: Option<i32>,
    pub cabin: String,
    pub travelers: i32,
    pub currency: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, TS)]
#[ts(export)]
pub struct FlightOffer {
    #[ts(type = "string")]
    pub id: Uuid,
    #[ts(type = "string")]
    pub search_query_id: Uuid,
    pub price: f64,
    pub currency: String,
    pub total_duration_minutes: Option<i32>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, TS)]
#[ts(export)]
pub struct FlightSegment {
    #[ts(type = "string")]
    pub id: Uuid,
    #[ts(type = "string")]
    pub offer_id: Uuid,
    pub origin_airport: String,
    pub destination_airport: String,
    pub airline_code: String,
    pub flight_number: Option<String>,
    #[ts(type = "string")]
    pub departure_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub arrival_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, TS)]
#[ts(export)]
pub struct BulkSearch {
    #[ts(type = "string")]
    pub id: Uuid,
    pub status: String,
    pub total_searches: i32,
    pub completed_count: i32,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub avg_price: Option<f64>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string | null")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, TS)]
#[ts(export)]
pub struct PriceGraphSweep {
    #[ts(type = "string")]
    pub id: Uuid,
    pub status: String,
    pub total: i32,
    pub completed: i32,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, TS)]
#[ts(export)]
pub struct PriceGraphResult {
    #[ts(type = "string")]
    pub id: Uuid,
    #[ts(type = "string")]
    pub sweep_id: Uuid,
    pub origin: String,
    pub destination: String,
    #[ts(type = "string")]
    pub departure_date: NaiveDate,
    #[ts(type = "string | null")]
    pub return_date: Option<NaiveDate>,
    pub trip_length_days: i32,
    pub price: f64,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, TS)]
#[ts(export)]
pub struct ContinuousSweepProgressRow {
    pub id: i32,
    pub origin_idx: i64,
    pub dest_idx: i64,
    pub window_idx: i64,
    pub trip_len_idx: i64,
    pub is_running: bool,
    pub is_paused: bool,
    pub skip_requested: bool,
    #[ts(type = "unknown")]
    pub config_snapshot: Value,
    pub shape_checksum: i64,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, TS)]
#[ts(export)]
pub struct Deal {
    #[ts(type = "string")]
    pub id: Uuid,
    pub origin: String,
    pub destination: String,
    #[ts(type = "string")]
    pub departure_date: NaiveDate,
    pub airline_code: String,
    pub price: f64,
    pub baseline_min: f64,
    pub baseline_avg: f64,
    pub discount_pct: f64,
    pub classification: String,
    pub score: f64,
    pub cost_per_mile: Option<f64>,
    pub status: String,
    #[ts(type = "string")]
    pub first_seen_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, TS)]
#[ts(export)]
pub struct DealAlert {
    #[ts(type = "string")]
    pub id: Uuid,
    #[ts(type = "string")]
    pub deal_id: Uuid,
    pub channel: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    pub delivered: bool,
}
