//! Job-type dispatch table and shared ingestion pipeline (§4.3, §9).
//!
//! Each job type is a variant of the `JobType` sum type with its own payload
//! shape; `Handlers::dispatch` maps a dequeued job to its handler rather than
//! using class-hierarchy dispatch, per the "Polymorphic handlers" design note.

pub mod deals;

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DealThresholds;
use crate::db::DbContext;
use crate::db::search_queries::{OfferInsert, SegmentInsert};
use crate::error::{AppError, Result};
use crate::graph::GraphStore;
use crate::ingestion::deals::{Baseline, classify};
use crate::oracle::{PriceGraphArgs, PriceOracle, TripArgs};
use crate::queue::{JobId, JobQueue};
use crate::sweep::SweepController;

/// The job types this service knows how to handle, per §9's `JobType` sum type.
pub enum JobType {
    FlightSearch,
    BulkSearch,
    PriceGraphSweep,
    ContinuousPriceGraph,
}

impl JobType {
    pub fn parse(job_type: &str) -> Option<Self> {
        Some(match job_type {
            "flight_search" => JobType::FlightSearch,
            "bulk_search" => JobType::BulkSearch,
            "price_graph_sweep" => JobType::PriceGraphSweep,
            "continuous_price_graph" => JobType::ContinuousPriceGraph,
            _ => return None,
        })
    }
}

/// Also derives `Serialize` so the `/jobs/enqueue/*` and `/bulk-search`
/// handlers can build this payload on the way into the queue, not just
/// parse it back out on the way to a handler.
#[derive(Debug, Serialize, Deserialize)]
pub struct FlightSearchPayload {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    #[serde(default = "default_cabin")]
    pub cabin: String,
    pub stops: Option<i32>,
    #[serde(default = "default_travelers")]
    pub travelers: i32,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub excluded_airlines: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkSearchPayload {
    pub bulk_search_id: Uuid,
    #[serde(flatten)]
    pub leg: FlightSearchPayload,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PriceGraphSweepPayload {
    pub sweep_id: Uuid,
    pub origin: String,
    pub destination: String,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub trip_length_days: i32,
}

#[derive(Debug, Deserialize)]
pub struct ContinuousPriceGraphPayload {
    #[serde(flatten)]
    pub leg: FlightSearchPayload,
    pub trip_length_days: i32,
    #[serde(default)]
    pub priority: Option<String>,
}

fn default_cabin() -> String {
    "economy".to_string()
}
fn default_travelers() -> i32 {
    1
}
fn default_currency() -> String {
    "USD".to_string()
}

/// Shared dependencies every handler needs; held by the worker pool and
/// passed by reference to each dispatch.
pub struct Handlers {
    pub db: DbContext,
    pub queue: Arc<dyn JobQueue>,
    pub oracle: Arc<dyn PriceOracle>,
    pub graph: Arc<GraphStore>,
    pub sweep: Option<Arc<SweepController>>,
    pub deal_thresholds: DealThresholds,
}

impl Handlers {
    pub async fn dispatch(&self, job_type: &str, job_id: &JobId, payload: &serde_json::Value) -> Result<()> {
        let Some(parsed_type) = JobType::parse(job_type) else {
            warn!(job_type, "unhandled job type");
            return Ok(());
        };
        match parsed_type {
            JobType::FlightSearch => {
                let args: FlightSearchPayload = serde_json::from_value(payload.clone())
                    .map_err(|e| AppError::Validation(e.to_string()))?;
                self.handle_flight_search(job_id, &args).await?;
            }
            JobType::BulkSearch => {
                let args: BulkSearchPayload = serde_json::from_value(payload.clone())
                    .map_err(|e| AppError::Validation(e.to_string()))?;
                self.handle_bulk_search(job_id, &args).await?;
            }
            JobType::PriceGraphSweep => {
                let args: PriceGraphSweepPayload = serde_json::from_value(payload.clone())
                    .map_err(|e| AppError::Validation(e.to_string()))?;
                self.handle_price_graph_sweep(job_id, &args).await?;
            }
            JobType::ContinuousPriceGraph => {
                let args: ContinuousPriceGraphPayload = serde_json::from_value(payload.clone())
                    .map_err(|e| AppError::Validation(e.to_string()))?;
                let result = self.handle_continuous_price_graph(job_id, &args).await;
                if let Some(sweep) = &self.sweep {
                    sweep.mark_probe_complete(&job_id.0);
                }
                result?;
            }
        }
        Ok(())
    }

    /// True once the job's cancellation flag is set. Checked at the
    /// cooperative checkpoints §5 calls out — before the oracle call and
    /// between offer persists — so a canceled job aborts cleanly instead of
    /// running to completion or being nacked as a failure.
    async fn checkpoint_canceled(&self, job_id: &JobId) -> bool {
        matches!(self.queue.is_job_canceled(job_id).await, Ok(true))
    }

    async fn handle_flight_search(&self, job_id: &JobId, args: &FlightSearchPayload) -> Result<()> {
        if self.checkpoint_canceled(job_id).await {
            debug!(job_id = %job_id, "job canceled before oracle call, aborting");
            return Ok(());
        }
        let trip = trip_args(args);
        let (offers, diagnostics) = self.oracle.get_offers(&trip).await?;
        info!(
            origin = args.origin,
            destination = args.destination,
            offers = offers.len(),
            unmarshal_failures = diagnostics.unmarshal_failures,
            date_parse_failures = diagnostics.date_parse_failures,
            "flight search ingested"
        );

        let inserts: Vec<OfferInsert> = offers
            .iter()
            .map(|offer| OfferInsert {
                price: offer.price,
                currency: offer.currency.clone(),
                total_duration_minutes: offer.total_duration_minutes,
                segments: offer
                    .segments
                    .iter()
                    .map(|s| SegmentInsert {
                        origin_airport: s.origin_airport.clone(),
                        destination_airport: s.destination_airport.clone(),
                        airline_code: s.airline_code.clone(),
                        flight_number: s.flight_number.clone(),
                        departure_at: s.departure_at,
                        arrival_at: s.arrival_at,
                    })
                    .collect(),
            })
            .collect();

        self.db
            .search_queries()
            .insert_with_offers(
                &args.origin,
                &args.destination,
                args.departure_date,
                args.return_date,
                None,
                &args.cabin,
                args.travelers,
                &args.currency,
                &inserts,
            )
            .await?;

        let trip_type = if args.return_date.is_some() { "round_trip" } else { "one_way" };
        for offer in &offers {
            if self.checkpoint_canceled(job_id).await {
                debug!(job_id = %job_id, "job canceled between offer persists, aborting");
                return Ok(());
            }
            self.record_price_point_and_classify(
                &args.origin,
                &args.destination,
                args.departure_date,
                offer.segments.first().map(|s| s.airline_code.as_str()).unwrap_or("XX"),
                trip_type,
                args.return_date,
                offer.price,
            )
            .await?;
        }

        Ok(())
    }

    async fn handle_bulk_search(&self, job_id: &JobId, args: &BulkSearchPayload) -> Result<()> {
        if self.checkpoint_canceled(job_id).await {
            debug!(job_id = %job_id, "job canceled before oracle call, aborting");
            return Ok(());
        }
        let trip = trip_args(&args.leg);
        let (offers, _diagnostics) = self.oracle.get_offers(&trip).await?;
        let min_price = offers.iter().map(|o| o.price).fold(f64::INFINITY, f64::min);
        if min_price.is_finite() {
            self.db.bulk_searches().record_completion(args.bulk_search_id, min_price).await?;
        }
        Ok(())
    }

    async fn handle_price_graph_sweep(&self, job_id: &JobId, args: &PriceGraphSweepPayload) -> Result<()> {
        if self.checkpoint_canceled(job_id).await {
            debug!(job_id = %job_id, "job canceled before oracle call, aborting");
            return Ok(());
        }
        let graph_args = PriceGraphArgs {
            origin: args.origin.clone(),
            destination: args.destination.clone(),
            window_start: args.window_start,
            window_end: args.window_end,
            trip_length_days: args.trip_length_days,
        };
        let points = self.oracle.get_price_graph(&graph_args).await?;
        for point in &points {
            if self.checkpoint_canceled(job_id).await {
                debug!(job_id = %job_id, "job canceled between offer persists, aborting");
                return Ok(());
            }
            self.db
                .price_graph()
                .record_result(
                    args.sweep_id,
                    &args.origin,
                    &args.destination,
                    point.departure_date,
                    None,
                    args.trip_length_days,
                    point.price,
                )
                .await?;
            self.graph
                .record_price_point(
                    &args.origin,
                    &args.destination,
                    point.departure_date,
                    "XX",
                    "one_way",
                    None,
                    point.price,
                )
                .await;
        }
        Ok(())
    }

    async fn handle_continuous_price_graph(&self, job_id: &JobId, args: &ContinuousPriceGraphPayload) -> Result<()> {
        self.handle_flight_search(job_id, &args.leg).await
    }

    /// Upserts the PricePoint graph edge and runs the deal classifier
    /// against the route's baseline, per §4.3. The baseline is read from the
    /// graph store's PricePoint edges rather than the one-off price-graph
    /// sweep table, so deals classify off of whichever job type — continuous
    /// sweep or on-demand search — actually produced the point.
    #[allow(clippy::too_many_arguments)]
    async fn record_price_point_and_classify(
        &self,
        origin: &str,
        destination: &str,
        departure_date: NaiveDate,
        airline_code: &str,
        trip_type: &str,
        return_date: Option<NaiveDate>,
        price: f64,
    ) -> Result<()> {
        self.graph
            .record_price_point(origin, destination, departure_date, airline_code, trip_type, return_date, price)
            .await;

        let prices = self.graph.recent_prices(origin, destination, self.deal_thresholds.baseline_window_days).await;
        if prices.is_empty() {
            return Ok(());
        }
        let count = prices.len();
        let min = prices.iter().cloned().fold(f64::INFINITY, f64::min);
        let avg = prices.iter().sum::<f64>() / count as f64;
        let baseline = Baseline { min, avg, count };

        if let Some(verdict) = classify(price, &baseline, &self.deal_thresholds) {
            self.db
                .deals()
                .upsert(
                    origin,
                    destination,
                    departure_date,
                    airline_code,
                    price,
                    baseline.min,
                    baseline.avg,
                    verdict.discount_pct,
                    verdict.classification.as_str(),
                    verdict.score,
                    None,
                )
                .await?;
        }

        Ok(())
    }
}

fn trip_args(payload: &FlightSearchPayload) -> TripArgs {
    TripArgs {
        origin: payload.origin.clone(),
        destination: payload.destination.clone(),
        departure_date: payload.departure_date,
        return_date: payload.return_date,
        cabin: payload.cabin.clone(),
        stops: payload.stops,
        travelers: payload.travelers,
        currency: payload.currency.clone(),
        excluded_airlines: payload.excluded_airlines.clone(),
    }
}
