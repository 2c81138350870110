//! Price oracle contract (component A, §3, §9).
//!
//! The oracle itself is external: this module defines the trait the rest of
//! the crate programs against, a reqwest-backed implementation, and the
//! tolerant parser that turns its semi-structured responses into offers plus
//! diagnostics.

mod client;
mod parser;

pub use client::OracleClient;
pub use parser::{ParseErrors, ParsedOffer, ParsedSegment, parse_offers};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TripArgs {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub cabin: String,
    pub stops: Option<i32>,
    pub travelers: i32,
    pub currency: String,
    #[serde(default)]
    pub excluded_airlines: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PriceGraphArgs {
    pub origin: String,
    pub destination: String,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub trip_length_days: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PriceGraphPoint {
    #[ts(type = "string")]
    pub departure_date: NaiveDate,
    pub price: f64,
}

/// Given trip args, the oracle returns offers, price-graph points for a
/// window, or a shareable deep link to the same search.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_offers(&self, args: &TripArgs) -> Result<(Vec<ParsedOffer>, ParseErrors)>;
    async fn get_price_graph(&self, args: &PriceGraphArgs) -> Result<Vec<PriceGraphPoint>>;
    fn serialize_url(&self, args: &TripArgs) -> String;
}
